// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Responses wire variant (`POST <base>/responses`).
//!
//! The newer OpenAI dialect: the system prompt travels as a top-level
//! `instructions` field, conversation turns are "input items", tool calls
//! are `function_call` items, and tool results are `function_call_output`
//! items correlated by `call_id`.

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

pub struct ResponsesAdapter;

impl EndpointAdapter for ResponsesAdapter {
    fn format(&self) -> EndpointFormat {
        EndpointFormat::Responses
    }

    fn format_tools(&self, tools: &[UniversalToolDefinition]) -> Value {
        // Flat form: name/description/parameters live on the tool itself,
        // not under a nested "function" object.
        let arr: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        json!(arr)
    }

    fn format_messages(&self, messages: &[UniversalMessage]) -> Value {
        let mut items: Vec<Value> = Vec::with_capacity(messages.len());
        for m in messages {
            match m.role {
                Role::Assistant if m.tool_calls.is_some() => {
                    // Optional assistant text item, then one function_call
                    // item per requested call.
                    if !m.content.is_empty() {
                        items.push(json!({ "role": "assistant", "content": m.content }));
                    }
                    for c in m.tool_calls.as_deref().unwrap_or_default() {
                        items.push(json!({
                            "type": "function_call",
                            "call_id": c.id,
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }));
                    }
                }
                Role::Tool => {
                    items.push(json!({
                        "type": "function_call_output",
                        "call_id": m.tool_call_id.as_deref().unwrap_or(""),
                        "output": m.content,
                    }));
                }
                Role::System => {
                    // System text never appears as an input item in this
                    // dialect; callers route it through `instructions`.
                    items.push(json!({ "role": "user", "content": m.content }));
                }
                Role::User => {
                    items.push(json!({ "role": "user", "content": m.content }));
                }
                Role::Assistant => {
                    items.push(json!({ "role": "assistant", "content": m.content }));
                }
            }
        }
        json!(items)
    }

    fn build_url(&self, provider: &ProviderConfig, model: &ModelConfig) -> String {
        let base = model.base_url.as_deref().unwrap_or(&provider.base_url);
        format!("{}/responses", base.trim_end_matches('/'))
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
        let mut body = json!({
            "model": model.wire_id(),
            "input": self.format_messages(&req.messages),
            "stream": true,
        });
        if let Some(system) = &req.system {
            body["instructions"] = json!(system);
        }
        if let Some(requested) = req.max_output_tokens.or(model.max_output_tokens) {
            let cap = fit_output_tokens(requested, model.context_window, estimate_input_bytes(req));
            body["max_output_tokens"] = json!(cap);
        }
        if !req.tools.is_empty() {
            body["tools"] = self.format_tools(&req.tools);
        }
        body
    }

    fn parse_stream_event(&self, event: &Value) -> StreamDelta {
        let event_type = event["type"].as_str().unwrap_or("");
        match event_type {
            "response.output_text.delta" => StreamDelta {
                content: event["delta"].as_str().map(str::to_string),
                ..Default::default()
            },
            "response.reasoning_summary_text.delta" => StreamDelta {
                reasoning_content: event["delta"].as_str().map(str::to_string),
                ..Default::default()
            },
            "response.output_item.added" => {
                let item = &event["item"];
                if item["type"].as_str() == Some("function_call") {
                    StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: event["output_index"].as_u64().unwrap_or(0) as u32,
                            id: item["call_id"].as_str().map(str::to_string),
                            name: item["name"].as_str().map(str::to_string),
                            arguments: item["arguments"].as_str().unwrap_or("").to_string(),
                        }]),
                        ..Default::default()
                    }
                } else {
                    StreamDelta::empty()
                }
            }
            "response.function_call_arguments.delta" => StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: event["output_index"].as_u64().unwrap_or(0) as u32,
                    id: None,
                    name: None,
                    arguments: event["delta"].as_str().unwrap_or("").to_string(),
                }]),
                ..Default::default()
            },
            "response.completed" | "response.done" => {
                let response = &event["response"];
                let had_function_call = response["output"]
                    .as_array()
                    .map(|items| {
                        items.iter().any(|i| i["type"].as_str() == Some("function_call"))
                    })
                    .unwrap_or(false);
                let usage = response.get("usage").map(|u| {
                    let prompt = u["input_tokens"].as_u64().unwrap_or(0);
                    let completion = u["output_tokens"].as_u64().unwrap_or(0);
                    Usage {
                        prompt_tokens: prompt,
                        completion_tokens: completion,
                        total_tokens: u["total_tokens"].as_u64().unwrap_or(prompt + completion),
                    }
                });
                StreamDelta {
                    finish_reason: Some(if had_function_call {
                        FinishReason::ToolCalls
                    } else {
                        FinishReason::Stop
                    }),
                    usage,
                    ..Default::default()
                }
            }
            _ => StreamDelta::empty(),
        }
    }

    fn parse_response(&self, body: &Value) -> anyhow::Result<UniversalMessage> {
        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        if let Some(items) = body["output"].as_array() {
            for item in items {
                match item["type"].as_str().unwrap_or("") {
                    "message" => {
                        if let Some(parts) = item["content"].as_array() {
                            for p in parts {
                                if let Some(t) = p["text"].as_str() {
                                    text.push_str(t);
                                }
                            }
                        }
                    }
                    "function_call" => calls.push(ToolCall {
                        id: item["call_id"].as_str().unwrap_or("").to_string(),
                        name: item["name"].as_str().unwrap_or("").to_string(),
                        arguments: item["arguments"]
                            .as_str()
                            .and_then(|s| serde_json::from_str(s).ok())
                            .unwrap_or_else(|| json!({})),
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
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            id: "openai".into(),
            name: String::new(),
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            api_key_env: None,
            default_format: EndpointFormat::Responses,
            extra_headers: HashMap::new(),
        }
    }

    #[test]
    fn url_appends_responses() {
        let a = ResponsesAdapter;
        assert_eq!(
            a.build_url(&provider(), &ModelConfig::new("gpt-5")),
            "https://api.openai.com/v1/responses"
        );
    }

    #[test]
    fn system_goes_to_instructions_not_input() {
        let a = ResponsesAdapter;
        let req = CompletionRequest {
            messages: vec![UniversalMessage::user("q")],
            system: Some("rules".into()),
            ..Default::default()
        };
        let body = a.build_request_body(&req, &ModelConfig::new("gpt-5"));
        assert_eq!(body["instructions"], "rules");
        assert_eq!(body["input"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_definition_is_flat() {
        let a = ResponsesAdapter;
        let tools = a.format_tools(&[UniversalToolDefinition {
            name: "grep".into(),
            description: "search".into(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }]);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["name"], "grep");
        assert!(tools[0].get("function").is_none());
    }

    #[test]
    fn assistant_tool_calls_become_function_call_items() {
        let a = ResponsesAdapter;
        let msg = UniversalMessage::assistant_with_tool_calls(
            "let me check",
            vec![ToolCall { id: "c1".into(), name: "ls".into(), arguments: json!({}) }],
        );
        let items = a.format_messages(&[msg]);
        assert_eq!(items[0]["role"], "assistant");
        assert_eq!(items[1]["type"], "function_call");
        assert_eq!(items[1]["call_id"], "c1");
    }

    #[test]
    fn tool_result_becomes_function_call_output() {
        let a = ResponsesAdapter;
        let items = a.format_messages(&[UniversalMessage::tool_result("c1", "ls", "a\nb")]);
        assert_eq!(items[0]["type"], "function_call_output");
        assert_eq!(items[0]["call_id"], "c1");
        assert_eq!(items[0]["output"], "a\nb");
    }

    #[test]
    fn output_text_delta_maps_to_content() {
        let a = ResponsesAdapter;
        let d = a.parse_stream_event(&json!({"type": "response.output_text.delta", "delta": "hi"}));
        assert_eq!(d.content.as_deref(), Some("hi"));
    }

    #[test]
    fn output_item_added_opens_tool_call() {
        let a = ResponsesAdapter;
        let ev = json!({
            "type": "response.output_item.added",
            "output_index": 2,
            "item": {"type": "function_call", "call_id": "c9", "name": "write_file", "arguments": ""}
        });
        let tc = &a.parse_stream_event(&ev).tool_calls.unwrap()[0];
        assert_eq!(tc.index, 2);
        assert_eq!(tc.id.as_deref(), Some("c9"));
        assert_eq!(tc.name.as_deref(), Some("write_file"));
    }

    #[test]
    fn arguments_delta_appends_fragment() {
        let a = ResponsesAdapter;
        let ev = json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 2,
            "delta": "{\"pa"
        });
        let tc = &a.parse_stream_event(&ev).tool_calls.unwrap()[0];
        assert_eq!(tc.arguments, "{\"pa");
        assert!(tc.id.is_none() && tc.name.is_none());
    }

    #[test]
    fn completed_with_function_call_finishes_tool_calls() {
        let a = ResponsesAdapter;
        let ev = json!({
            "type": "response.completed",
            "response": {"output": [{"type": "function_call"}], "usage": {"input_tokens": 3, "output_tokens": 2}}
        });
        let d = a.parse_stream_event(&ev);
        assert_eq!(d.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(d.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn completed_without_function_call_finishes_stop() {
        let a = ResponsesAdapter;
        let ev = json!({"type": "response.completed", "response": {"output": []}});
        assert_eq!(a.parse_stream_event(&ev).finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn unknown_event_is_empty() {
        let a = ResponsesAdapter;
        assert!(a.parse_stream_event(&json!({"type": "response.in_progress"})).is_empty());
    }
}
