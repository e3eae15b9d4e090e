// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-format round-trip laws for the three endpoint adapters: formatting a
//! universal conversation and reading the wire form back preserves role
//! order, text content, and tool-call ids.  Anthropic additionally merges
//! consecutive same-role turns so strict alternation holds.

use std::collections::HashMap;

use serde_json::{json, Value};

use tern_config::{EndpointFormat, ModelConfig, ProviderConfig};
use tern_model::{adapter_for, CompletionRequest, ToolCall, UniversalMessage};

fn provider(format: EndpointFormat) -> ProviderConfig {
    ProviderConfig {
        id: "test".into(),
        name: String::new(),
        base_url: "https://api.example.com/v1".into(),
        api_key: Some("sk-test".into()),
        api_key_env: None,
        default_format: format,
        extra_headers: HashMap::new(),
    }
}

/// A conversation exercising every universal shape: user turn, assistant
/// tool-call turn, tool result, assistant text.
fn sample_conversation() -> Vec<UniversalMessage> {
    vec![
        UniversalMessage::user("read the readme"),
        UniversalMessage::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "call_A".into(),
                name: "read_file".into(),
                arguments: json!({"path": "/proj/README.md"}),
            }],
        ),
        UniversalMessage::tool_result("call_A", "read_file", "hello\n"),
        UniversalMessage::assistant("The README says hello."),
    ]
}

// ── Chat-completions ──────────────────────────────────────────────────────────

#[test]
fn chat_completions_preserves_order_content_and_ids() {
    let adapter = adapter_for(EndpointFormat::ChatCompletions);
    let wire = adapter.format_messages(&sample_conversation());
    let arr = wire.as_array().unwrap();
    assert_eq!(arr.len(), 4);
    assert_eq!(arr[0]["role"], "user");
    assert_eq!(arr[0]["content"], "read the readme");
    assert_eq!(arr[1]["role"], "assistant");
    assert_eq!(arr[1]["tool_calls"][0]["id"], "call_A");
    assert_eq!(arr[2]["role"], "tool");
    assert_eq!(arr[2]["tool_call_id"], "call_A");
    assert_eq!(arr[2]["content"], "hello\n");
    assert_eq!(arr[3]["role"], "assistant");
    assert_eq!(arr[3]["content"], "The README says hello.");
}

#[test]
fn chat_completions_arguments_survive_the_wire() {
    let adapter = adapter_for(EndpointFormat::ChatCompletions);
    let wire = adapter.format_messages(&sample_conversation());
    let raw = wire[1]["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
    let parsed: Value = serde_json::from_str(raw).unwrap();
    assert_eq!(parsed["path"], "/proj/README.md");
}

// ── Responses ─────────────────────────────────────────────────────────────────

#[test]
fn responses_preserves_order_and_call_ids() {
    let adapter = adapter_for(EndpointFormat::Responses);
    let wire = adapter.format_messages(&sample_conversation());
    let items = wire.as_array().unwrap();
    // user, function_call (no assistant text item: content empty),
    // function_call_output, assistant
    assert_eq!(items.len(), 4);
    assert_eq!(items[0]["role"], "user");
    assert_eq!(items[1]["type"], "function_call");
    assert_eq!(items[1]["call_id"], "call_A");
    assert_eq!(items[2]["type"], "function_call_output");
    assert_eq!(items[2]["call_id"], "call_A");
    assert_eq!(items[3]["role"], "assistant");
}

#[test]
fn responses_assistant_text_precedes_its_function_calls() {
    let adapter = adapter_for(EndpointFormat::Responses);
    let msg = UniversalMessage::assistant_with_tool_calls(
        "let me look",
        vec![ToolCall { id: "c1".into(), name: "ls".into(), arguments: json!({}) }],
    );
    let wire = adapter.format_messages(&[msg]);
    let items = wire.as_array().unwrap();
    assert_eq!(items[0]["role"], "assistant");
    assert_eq!(items[0]["content"], "let me look");
    assert_eq!(items[1]["type"], "function_call");
}

// ── Anthropic ─────────────────────────────────────────────────────────────────

#[test]
fn anthropic_merges_and_alternates() {
    let adapter = adapter_for(EndpointFormat::AnthropicMessages);
    let wire = adapter.format_messages(&sample_conversation());
    let turns = wire.as_array().unwrap();
    // user / assistant(tool_use) / user(tool_result) / assistant — already
    // alternating, nothing merged.
    assert_eq!(turns.len(), 4);
    let mut prev_role = "";
    for turn in turns {
        let role = turn["role"].as_str().unwrap();
        assert_ne!(role, prev_role, "strict alternation must hold");
        prev_role = role;
    }
    assert_eq!(turns[1]["content"][0]["id"], "call_A");
    assert_eq!(turns[2]["content"][0]["tool_use_id"], "call_A");
}

#[test]
fn anthropic_merges_consecutive_user_turns() {
    let adapter = adapter_for(EndpointFormat::AnthropicMessages);
    let wire = adapter.format_messages(&[
        UniversalMessage::user("first"),
        UniversalMessage::user("second"),
        UniversalMessage::assistant("ack"),
        UniversalMessage::assistant("more"),
    ]);
    let turns = wire.as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["content"].as_array().unwrap().len(), 2);
    assert_eq!(turns[1]["content"].as_array().unwrap().len(), 2);
}

// ── Request bodies ────────────────────────────────────────────────────────────

#[test]
fn each_variant_routes_the_system_prompt_differently() {
    let req = CompletionRequest {
        messages: vec![UniversalMessage::user("q")],
        system: Some("be brief".into()),
        ..Default::default()
    };
    let model = ModelConfig::new("m");

    let chat = adapter_for(EndpointFormat::ChatCompletions).build_request_body(&req, &model);
    assert_eq!(chat["messages"][0]["role"], "system");

    let responses = adapter_for(EndpointFormat::Responses).build_request_body(&req, &model);
    assert_eq!(responses["instructions"], "be brief");
    assert_ne!(responses["input"][0]["role"], "system");

    let anthropic =
        adapter_for(EndpointFormat::AnthropicMessages).build_request_body(&req, &model);
    assert_eq!(anthropic["system"], "be brief");
    assert_eq!(anthropic["messages"][0]["role"], "user");
}

#[test]
fn urls_follow_the_endpoint_table() {
    let model = ModelConfig::new("m");
    assert!(adapter_for(EndpointFormat::ChatCompletions)
        .build_url(&provider(EndpointFormat::ChatCompletions), &model)
        .ends_with("/chat/completions"));
    assert!(adapter_for(EndpointFormat::Responses)
        .build_url(&provider(EndpointFormat::Responses), &model)
        .ends_with("/responses"));
    assert!(adapter_for(EndpointFormat::AnthropicMessages)
        .build_url(&provider(EndpointFormat::AnthropicMessages), &model)
        .ends_with("/messages"));
}

#[test]
fn output_cap_is_fitted_into_the_context_window() {
    let mut model = ModelConfig::new("m");
    model.max_output_tokens = Some(50_000);
    model.context_window = Some(16_000);
    let req = CompletionRequest {
        messages: vec![UniversalMessage::user("short")],
        ..Default::default()
    };
    let body = adapter_for(EndpointFormat::ChatCompletions).build_request_body(&req, &model);
    let cap = body["max_tokens"].as_u64().unwrap();
    assert!(cap < 16_000, "cap {cap} must leave room for the input");
    assert!(cap >= 1000, "cap {cap} must respect the floor");
}
