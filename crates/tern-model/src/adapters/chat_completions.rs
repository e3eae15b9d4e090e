// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chat-completions wire variant (`POST <base>/chat/completions`).
//!
//! The most widely spoken dialect: the system prompt is the first message,
//! tools are `{type: "function", function: {...}}` entries, and tool results
//! travel as `{role: "tool", tool_call_id, content}` messages.

use serde_json::{json, Value};

use tern_config::{EndpointFormat, ModelConfig, ProviderConfig};

use crate::adapter::{
    estimate_input_bytes, fit_output_tokens, merge_headers, EndpointAdapter,
};
use crate::types::{
    CompletionRequest, FinishReason, StreamDelta, ToolCall, ToolCallDelta, UniversalMessage,
    UniversalToolDefinition, Usage,
};
use crate::Role;

pub struct ChatCompletionsAdapter;

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

impl EndpointAdapter for ChatCompletionsAdapter {
    fn format(&self) -> EndpointFormat {
        EndpointFormat::ChatCompletions
    }

    fn format_tools(&self, tools: &[UniversalToolDefinition]) -> Value {
        let arr: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        json!(arr)
    }

    fn format_messages(&self, messages: &[UniversalMessage]) -> Value {
        let mut out: Vec<Value> = Vec::with_capacity(messages.len());
        for m in messages {
            match m.role {
                Role::Assistant if m.tool_calls.is_some() => {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    // arguments travel as a JSON-encoded string
                                    "arguments": c.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    let mut v = json!({ "role": "assistant", "tool_calls": calls });
                    if !m.content.is_empty() {
                        v["content"] = json!(m.content);
                    }
                    out.push(v);
                }
                Role::Tool => {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
                        "content": m.content,
                    }));
                }
                _ => {
                    out.push(json!({ "role": role_str(&m.role), "content": m.content }));
                }
            }
        }
        json!(out)
    }

    fn build_url(&self, provider: &ProviderConfig, model: &ModelConfig) -> String {
        let base = model.base_url.as_deref().unwrap_or(&provider.base_url);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn build_headers(
        &self,
        provider: &ProviderConfig,
        model: &ModelConfig,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let mut base = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(key) = provider.resolve_api_key() {
            base.push(("Authorization".to_string(), format!("Bearer {key}")));
        }
        merge_headers(base, provider, model)
    }

    fn build_request_body(&self, req: &CompletionRequest, model: &ModelConfig) -> Value {
        // System prompt is the first message in this dialect.
        let mut wire_messages: Vec<Value> = Vec::new();
        if let Some(system) = &req.system {
            wire_messages.push(json!({ "role": "system", "content": system }));
        }
        if let Value::Array(rest) = self.format_messages(&req.messages) {
            wire_messages.extend(rest);
        }

        let mut body = json!({
            "model": model.wire_id(),
            "messages": wire_messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(requested) = req.max_output_tokens.or(model.max_output_tokens) {
            let cap = fit_output_tokens(requested, model.context_window, estimate_input_bytes(req));
            body["max_tokens"] = json!(cap);
        }
        if !req.tools.is_empty() {
            body["tools"] = self.format_tools(&req.tools);
        }
        body
    }

    fn parse_stream_event(&self, event: &Value) -> StreamDelta {
        // Usage-only chunk (emitted when stream_options.include_usage = true).
        if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
            let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0);
            let completion = usage["completion_tokens"].as_u64().unwrap_or(0);
            let total = usage["total_tokens"].as_u64().unwrap_or(prompt + completion);
            return StreamDelta {
                usage: Some(Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: total,
                }),
                ..Default::default()
            };
        }

        let choice = &event["choices"][0];
        let mut delta = StreamDelta::default();

        delta.finish_reason = match choice["finish_reason"].as_str() {
            Some("stop") => Some(FinishReason::Stop),
            Some("tool_calls") => Some(FinishReason::ToolCalls),
            Some("length") => Some(FinishReason::Length),
            Some("content_filter") => Some(FinishReason::ContentFilter),
            _ => None,
        };

        let wire_delta = &choice["delta"];
        if let Some(text) = wire_delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                delta.content = Some(text.to_string());
            }
        }
        // Chain-of-thought text arrives as `reasoning_content` (llama.cpp,
        // DeepSeek) or `reasoning` (some aggregators).
        let reasoning = wire_delta
            .get("reasoning_content")
            .and_then(|c| c.as_str())
            .or_else(|| wire_delta.get("reasoning").and_then(|c| c.as_str()));
        if let Some(text) = reasoning {
            if !text.is_empty() {
                delta.reasoning_content = Some(text.to_string());
            }
        }

        if let Some(tool_calls) = wire_delta.get("tool_calls").and_then(|t| t.as_array()) {
            let parsed: Vec<ToolCallDelta> = tool_calls
                .iter()
                .map(|tc| ToolCallDelta {
                    index: tc["index"].as_u64().unwrap_or(0) as u32,
                    id: tc["id"].as_str().filter(|s| !s.is_empty()).map(str::to_string),
                    name: tc["function"]["name"]
                        .as_str()
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
                })
                .collect();
            if !parsed.is_empty() {
                delta.tool_calls = Some(parsed);
            }
        }

        delta
    }

    fn parse_response(&self, body: &Value) -> anyhow::Result<UniversalMessage> {
        let message = &body["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or("").to_string();
        let tool_calls = message["tool_calls"].as_array().map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: tc["function"]["arguments"]
                        .as_str()
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_else(|| json!({})),
                })
                .collect::<Vec<_>>()
        });
        Ok(match tool_calls {
            Some(calls) if !calls.is_empty() => {
                UniversalMessage::assistant_with_tool_calls(content, calls)
            }
            _ => UniversalMessage::assistant(content),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
