// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic-messages wire variant (`POST <base>/messages`).
//!
//! The system prompt is a top-level `system` param, tools are
//! `{name, description, input_schema}`, tool calls are `tool_use` content
//! blocks, and tool results are `tool_result` blocks inside `user` turns.
//! The API requires strict user/assistant alternation, so consecutive
//! same-role messages are merged after formatting.

use serde_json::{json, Value};

use tern_config::{EndpointFormat, ModelConfig, ProviderConfig};

use crate::adapter::{
    estimate_input_bytes, fit_output_tokens, merge_headers, EndpointAdapter,
};
use crate::error::{classify_http_error, ProviderError, ProviderErrorKind};
use crate::types::{
    CompletionRequest, FinishReason, StreamDelta, ToolCall, ToolCallDelta, UniversalMessage,
    UniversalToolDefinition, Usage,
};
use crate::Role;

/// Sent when neither the request nor the model config carries a cap; the
/// API rejects requests without `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicMessagesAdapter;

impl EndpointAdapter for AnthropicMessagesAdapter {
    fn format(&self) -> EndpointFormat {
        EndpointFormat::AnthropicMessages
    }

    fn format_tools(&self, tools: &[UniversalToolDefinition]) -> Value {
        let arr: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        json!(arr)
    }

    fn format_messages(&self, messages: &[UniversalMessage]) -> Value {
        // Every turn is built with a content-block array so that the
        // alternation merge below can concatenate uniformly.
        let mut out: Vec<Value> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => continue, // routed through the top-level param
                Role::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !m.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": m.content }));
                    }
                    for c in m.tool_calls.as_deref().unwrap_or_default() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": c.id,
                            "name": c.name,
                            "input": c.arguments,
                        }));
                    }
                    if blocks.is_empty() {
                        blocks.push(json!({ "type": "text", "text": "" }));
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
                Role::Tool => {
                    out.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": m.tool_call_id.as_deref().unwrap_or(""),
                            "content": m.content,
                        }]
                    }));
                }
                Role::User => {
                    out.push(json!({
                        "role": "user",
                        "content": [{ "type": "text", "text": m.content }]
                    }));
                }
            }
        }
        json!(merge_adjacent_same_role(out))
    }

    fn build_url(&self, provider: &ProviderConfig, model: &ModelConfig) -> String {
        let base = model.base_url.as_deref().unwrap_or(&provider.base_url);
        format!("{}/messages", base.trim_end_matches('/'))
    }

    fn build_headers(
        &self,
        provider: &ProviderConfig,
        model: &ModelConfig,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let mut base = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("anthropic-version".to_string(), "2023-06-01".to_string()),
        ];
        if let Some(key) = provider.resolve_api_key() {
            base.push(("x-api-key".to_string(), key));
        }
        merge_headers(base, provider, model)
    }

    fn build_request_body(&self, req: &CompletionRequest, model: &ModelConfig) -> Value {
        let requested = req
            .max_output_tokens
            .or(model.max_output_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let cap = fit_output_tokens(requested, model.context_window, estimate_input_bytes(req));

        let mut body = json!({
            "model": model.wire_id(),
            "messages": self.format_messages(&req.messages),
            "max_tokens": cap,
            "stream": true,
        });
        if let Some(system) = &req.system {
            body["system"] = json!(system);
        }
        if !req.tools.is_empty() {
            body["tools"] = self.format_tools(&req.tools);
        }
        body
    }

    fn parse_stream_event(&self, event: &Value) -> StreamDelta {
        let event_type = event["type"].as_str().unwrap_or("");
        match event_type {
            "content_block_delta" => {
                let index = event["index"].as_u64().unwrap_or(0) as u32;
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => StreamDelta {
                        content: delta["text"].as_str().map(str::to_string),
                        ..Default::default()
                    },
                    "thinking_delta" => StreamDelta {
                        reasoning_content: delta["thinking"]
                            .as_str()
                            .filter(|s| !s.is_empty())
                            .map(str::to_string),
                        ..Default::default()
                    },
                    "input_json_delta" => StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index,
                            id: None,
                            name: None,
                            arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                        }]),
                        ..Default::default()
                    },
                    // signature_delta carries an opaque integrity blob; drop it.
                    _ => StreamDelta::empty(),
                }
            }
            "content_block_start" => {
                let index = event["index"].as_u64().unwrap_or(0) as u32;
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index,
                            id: block["id"].as_str().map(str::to_string),
                            name: block["name"].as_str().map(str::to_string),
                            arguments: String::new(),
                        }]),
                        ..Default::default()
                    }
                } else {
                    StreamDelta::empty()
                }
            }
            "message_start" => {
                // Prompt-token usage arrives only here; completion tokens are
                // reported later on message_delta.  Both are summed by the
                // stream processor, so each side is zeroed on the other event.
                event["message"]
                    .get("usage")
                    .map(|u| {
                        let prompt = u["input_tokens"].as_u64().unwrap_or(0);
                        StreamDelta {
                            usage: Some(Usage {
                                prompt_tokens: prompt,
                                completion_tokens: 0,
                                total_tokens: prompt,
                            }),
                            ..Default::default()
                        }
                    })
                    .unwrap_or_else(StreamDelta::empty)
            }
            "message_delta" => {
                let mut delta = StreamDelta::default();
                delta.finish_reason = match event["delta"]["stop_reason"].as_str() {
                    Some("tool_use") => Some(FinishReason::ToolCalls),
                    Some("end_turn") => Some(FinishReason::Stop),
                    Some("max_tokens") => Some(FinishReason::Length),
                    Some("stop_sequence") => Some(FinishReason::Stop),
                    _ => None,
                };
                if let Some(u) = event.get("usage") {
                    let completion = u["output_tokens"].as_u64().unwrap_or(0);
                    delta.usage = Some(Usage {
                        prompt_tokens: 0,
                        completion_tokens: completion,
                        total_tokens: completion,
                    });
                }
                delta
            }
            _ => StreamDelta::empty(),
        }
    }

    fn parse_response(&self, body: &Value) -> anyhow::Result<UniversalMessage> {
        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        if let Some(blocks) = body["content"].as_array() {
            for block in blocks {
                match block["type"].as_str().unwrap_or("") {
                    "text" => text.push_str(block["text"].as_str().unwrap_or("")),
                    "tool_use" => calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: block["input"].clone(),
                    }),
                    _ => {}
                }
            }
        }
        Ok(if calls.is_empty() {
            UniversalMessage::assistant(text)
        } else {
            UniversalMessage::assistant_with_tool_calls(text, calls)
        })
    }

    fn parse_error(&self, status: u16, body: &str) -> ProviderError {
        let mut err = classify_http_error(status, body);
        if err.kind == ProviderErrorKind::Auth {
            err.message
                .push_str(" (check the x-api-key header / ANTHROPIC_API_KEY)");
        }
        err
    }
}

/// Merge consecutive same-role messages by concatenating their content-block
/// arrays, preserving the API's strict user/assistant alternation.
fn merge_adjacent_same_role(messages: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    for msg in messages {
        match out.last_mut() {
            Some(prev) if prev["role"] == msg["role"] => {
                let extra = msg["content"].as_array().cloned().unwrap_or_default();
                if let Some(blocks) = prev["content"].as_array_mut() {
                    blocks.extend(extra);
                }
            }
            _ => out.push(msg),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
