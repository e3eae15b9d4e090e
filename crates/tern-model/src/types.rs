// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier issued by the provider (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Decoded JSON argument object.
    pub arguments: Value,
}

/// Provider-agnostic conversation entry.
///
/// An assistant message may carry `tool_calls`; a tool message links back to
/// its originating call via `tool_call_id`.  All other role/field
/// combinations leave the optional fields `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl UniversalMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            tool_calls: None,
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Assistant turn that requests one or more tool calls.  `content` may
    /// be empty when the model emitted no accompanying text.
    pub fn assistant_with_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Some(calls),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Tool-result turn linked to its originating call.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: output.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic over the text content plus a
    /// textual rendering of any tool-call names and arguments.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(calls) = &self.tool_calls {
            for c in calls {
                chars += c.name.len() + c.arguments.to_string().len();
            }
        }
        chars.div_ceil(4).max(1)
    }
}

// ─── Tool definitions and results ─────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object (`type: "object"`, a property
    /// map, and a required list).
    pub parameters: Value,
}

/// The outcome of one tool execution.  Always produced: failure is encoded
/// as `success = false` with an error message in `output`, never as an
/// unwound error across the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

// ─── Streaming model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

/// Token usage, summed additively across stream deltas and loop iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One fragment of a streamed tool call.
///
/// The first occurrence at an `index` carries `id` and `name` (and possibly
/// seed `arguments` text); subsequent fragments at the same index append to
/// the arguments buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// One incremental unit produced by an adapter's stream-event parser.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl StreamDelta {
    /// A delta that carries nothing — keepalives and unknown event types
    /// normalize to this so the accumulator can ignore them uniformly.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.reasoning_content.is_none()
            && self.tool_calls.is_none()
            && self.finish_reason.is_none()
            && self.usage.is_none()
    }
}

// ─── Requests ─────────────────────────────────────────────────────────────────

/// Request handed to an endpoint adapter.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Conversation in universal form.  A system prompt travels as the
    /// `system` field, not as a message; adapters place it per their wire
    /// format.
    pub messages: Vec<UniversalMessage>,
    pub system: Option<String>,
    pub tools: Vec<UniversalToolDefinition>,
    /// Requested output-token cap before context-window fitting.
    pub max_output_tokens: Option<u32>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
