// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Events emitted by the agent during a run.
//!
//! Consumers (shell, panels, logs) subscribe to these through the run's
//! event sink.  `seq` is strictly increasing per run; events always arrive
//! in sequence order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use tern_model::Usage;

/// Maximum characters of tool output carried in a `tool_result` event.
/// The conversation keeps the full output; only the display copy is cut.
pub const TOOL_RESULT_DISPLAY_CAP: usize = 5000;

#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: AgentEventData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEventData {
    Thinking {
        message: String,
    },
    IterationStart {
        iteration: u32,
        max_iterations: u32,
    },
    TextDelta {
        content: String,
    },
    ReasoningDelta {
        content: String,
    },
    ToolCallStart {
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<u32>,
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
    },
    ToolCallDelta {
        index: u32,
        arguments: String,
    },
    ToolApprovalRequired {
        approval_id: String,
        tool_name: String,
        tool_args: Value,
        tool_call_id: String,
    },
    PathApprovalRequired {
        approval_id: String,
        file_path: String,
        reason: String,
    },
    ToolResult {
        id: String,
        name: String,
        success: bool,
        /// Truncated to [`TOOL_RESULT_DISPLAY_CAP`] characters.
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    IterationComplete {
        iteration: u32,
        tool_call_count: usize,
        continuing: bool,
    },
    AgentComplete {
        iterations: u32,
        tool_calls_executed: usize,
        content_length: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    AgentError {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        iteration: Option<u32>,
    },
    AgentAborted {
        iteration: u32,
        content: String,
    },
}

/// Truncate tool output for event display, keeping a char boundary.
pub fn display_output(full: &str) -> String {
    if full.len() <= TOOL_RESULT_DISPLAY_CAP {
        return full.to_string();
    }
    let mut cut = TOOL_RESULT_DISPLAY_CAP;
    while !full.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} chars]", &full[..cut], full.len() - cut)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
