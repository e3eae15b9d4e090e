// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded-context conversation history.
//!
//! One manager is created per agent run, seeded from prior history, mutated
//! only by that run's loop, and snapshotted into the final response.  When
//! the token estimate exceeds the installed limit, messages are evicted from
//! the front — atomically per tool-call group so that an
//! assistant-with-tool-calls message and its linked tool results are either
//! all present or all gone.

use serde::{Deserialize, Serialize};

use tern_model::{Role, ToolCall, ToolResult, UniversalMessage};

/// Messages below this count are never evicted.
const EVICTION_FLOOR: usize = 4;

#[derive(Debug)]
pub struct ConversationManager {
    messages: Vec<UniversalMessage>,
    /// Signed so that accounting drift is detectable (negative ⇒ rebuild).
    estimated_tokens: i64,
    max_context_tokens: Option<usize>,
}

/// Serializable snapshot of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub messages: Vec<UniversalMessage>,
}

impl ConversationManager {
    pub fn new() -> Self {
        Self { messages: Vec::new(), estimated_tokens: 0, max_context_tokens: None }
    }

    /// Install the eviction threshold (from `model.context_window`).
    pub fn with_limit(mut self, max_context_tokens: usize) -> Self {
        self.max_context_tokens = Some(max_context_tokens);
        self
    }

    /// Seed from prior history without triggering eviction per message;
    /// bounds are enforced once at the end.
    pub fn seed(&mut self, history: Vec<UniversalMessage>) {
        for m in history {
            self.estimated_tokens += m.approx_tokens() as i64;
            self.messages.push(m);
        }
        self.enforce_bounds();
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(UniversalMessage::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(UniversalMessage::assistant(text));
    }

    pub fn push_assistant_with_tool_calls(
        &mut self,
        text: impl Into<String>,
        calls: Vec<ToolCall>,
    ) {
        self.push(UniversalMessage::assistant_with_tool_calls(text, calls));
    }

    /// The full tool output is persisted here; event-level display
    /// truncation never reaches the conversation.
    pub fn push_tool_result(&mut self, result: &ToolResult) {
        self.push(UniversalMessage::tool_result(
            &result.tool_call_id,
            &result.tool_name,
            &result.output,
        ));
    }

    pub fn push(&mut self, msg: UniversalMessage) {
        self.estimated_tokens += msg.approx_tokens() as i64;
        self.messages.push(msg);
        self.enforce_bounds();
    }

    pub fn messages(&self) -> &[UniversalMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimated_tokens.max(0) as usize
    }

    /// Restore a snapshot, replacing the current message list.
    pub fn replace(&mut self, messages: Vec<UniversalMessage>) {
        self.messages = messages;
        self.rebuild_estimate();
        self.enforce_bounds();
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot { messages: self.messages.clone() }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> anyhow::Result<Self> {
        let snap: ConversationSnapshot = serde_json::from_value(value.clone())?;
        let mut m = Self::new();
        m.messages = snap.messages;
        m.rebuild_estimate();
        Ok(m)
    }

    fn rebuild_estimate(&mut self) {
        self.estimated_tokens = self
            .messages
            .iter()
            .map(|m| m.approx_tokens() as i64)
            .sum();
    }

    /// Evict from the front until the estimate fits the limit.  Bounded by
    /// the message count at entry to prevent pathological churn.
    fn enforce_bounds(&mut self) {
        let Some(max) = self.max_context_tokens else { return };

        let entry_len = self.messages.len();
        for _ in 0..entry_len {
            if self.estimated_tokens <= max as i64 || self.messages.len() <= EVICTION_FLOOR {
                break;
            }
            if !self.evict_front() {
                break;
            }
            if self.estimated_tokens < 0 {
                // Accounting drift; rebuild from scratch.
                self.rebuild_estimate();
            }
        }
    }

    /// Evict the first evictable message (or its whole tool-call group).
    /// Returns false when nothing beyond system messages remains.
    fn evict_front(&mut self) -> bool {
        // System messages are never evicted; advance past them.
        let mut idx = 0;
        while idx < self.messages.len() && self.messages[idx].role == Role::System {
            idx += 1;
        }
        if idx >= self.messages.len() {
            return false;
        }

        let (start, end) = self.eviction_range(idx);
        let removed: i64 = self.messages[start..end]
            .iter()
            .map(|m| m.approx_tokens() as i64)
            .sum();
        self.messages.drain(start..end);
        self.estimated_tokens -= removed;
        true
    }

    /// The half-open range to evict for the candidate at `idx`, honouring
    /// tool-call-group atomicity.
    fn eviction_range(&self, idx: usize) -> (usize, usize) {
        let candidate = &self.messages[idx];

        // Assistant carrying tool calls: take the group forward.
        if candidate.role == Role::Assistant {
            if let Some(calls) = &candidate.tool_calls {
                return (idx, self.group_end(idx, calls));
            }
        }

        // Tool result: walk backward to its originating assistant and evict
        // the group from there.
        if candidate.role == Role::Tool {
            if let Some(call_id) = &candidate.tool_call_id {
                for back in (0..idx).rev() {
                    let m = &self.messages[back];
                    if m.role == Role::Assistant {
                        if let Some(calls) = &m.tool_calls {
                            if calls.iter().any(|c| &c.id == call_id) {
                                return (back, self.group_end(back, calls));
                            }
                        }
                    }
                }
            }
            // Orphan tool result (originator already gone): single eviction.
        }

        (idx, idx + 1)
    }

    /// Index one past the last tool message belonging to the call set of the
    /// assistant at `start`.
    fn group_end(&self, start: usize, calls: &[ToolCall]) -> usize {
        let ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        let mut end = start + 1;
        while end < self.messages.len() {
            let m = &self.messages[end];
            let linked = m.role == Role::Tool
                && m.tool_call_id
                    .as_deref()
                    .map(|id| ids.contains(&id))
                    .unwrap_or(false);
            if linked {
                end += 1;
            } else {
                break;
            }
        }
        end
    }
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
