// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod agent;
pub mod approval;
pub mod conversation;
pub mod events;

pub use agent::{AbortHandle, AgentRequest, AgentResponse, AgentRunner};
pub use approval::{
    AlwaysApprove, AlwaysDecline, PathApprovalRequest, PathApprover, ToolApprovalRequest,
    ToolApprover,
};
pub use conversation::{ConversationManager, ConversationSnapshot};
pub use events::{AgentEvent, AgentEventData, TOOL_RESULT_DISPLAY_CAP};
