// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Approval seams.
//!
//! Approvals are suspension points: the loop emits an event carrying an
//! approval id, then awaits the host's decision through these traits.  The
//! host resolves them however it likes (dialog, policy, auto-allow); from
//! the loop's side each is just an awaited future.

use async_trait::async_trait;
use serde_json::Value;

pub use tern_tools::{PathApprovalRequest, PathApprover};

/// One mutating tool call awaiting a decision.
#[derive(Debug, Clone)]
pub struct ToolApprovalRequest {
    pub approval_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Consulted before each call to a mutating tool.  Returning `false`
/// produces a declined tool result; the run continues either way.
#[async_trait]
pub trait ToolApprover: Send + Sync {
    async fn approve(&self, req: &ToolApprovalRequest) -> bool;
}

/// Blanket allow/deny approvers for hosts and tests.
pub struct AlwaysApprove;

#[async_trait]
impl ToolApprover for AlwaysApprove {
    async fn approve(&self, _req: &ToolApprovalRequest) -> bool {
        true
    }
}

pub struct AlwaysDecline;

#[async_trait]
impl ToolApprover for AlwaysDecline {
    async fn approve(&self, _req: &ToolApprovalRequest) -> bool {
        false
    }
}
