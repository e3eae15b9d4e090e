// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Endpoint-format adapter boundary.
//!
//! Three wire protocols (two OpenAI-family variants and one
//! Anthropic-family variant) are normalized behind one narrow trait.  The
//! agent loop binds to the trait only; which implementation serves a run is
//! decided once, at run start, by [`resolve_format`].

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde_json::Value;

use tern_config::{EndpointFormat, ModelConfig, ProviderConfig};

use crate::adapters::{AnthropicMessagesAdapter, ChatCompletionsAdapter, ResponsesAdapter};
use crate::error::{classify_http_error, ProviderError};
use crate::types::{CompletionRequest, StreamDelta, UniversalMessage, UniversalToolDefinition};

/// Floor for the recomputed output-token cap.
pub const MIN_OUTPUT_TOKENS: u32 = 1000;
/// Headroom subtracted from the context window so request + response fit.
pub const SAFETY_BUFFER: u32 = 2000;

/// One wire-protocol variant, normalized to the universal model.
pub trait EndpointAdapter: Send + Sync {
    fn format(&self) -> EndpointFormat;

    /// Tool definitions in this variant's wire form.
    fn format_tools(&self, tools: &[UniversalToolDefinition]) -> Value;

    /// Conversation messages (or input items) in this variant's wire form.
    fn format_messages(&self, messages: &[UniversalMessage]) -> Value;

    fn build_url(&self, provider: &ProviderConfig, model: &ModelConfig) -> String;

    fn build_headers(
        &self,
        provider: &ProviderConfig,
        model: &ModelConfig,
    ) -> anyhow::Result<Vec<(String, String)>>;

    fn build_request_body(&self, req: &CompletionRequest, model: &ModelConfig) -> Value;

    /// Map one decoded wire event to a [`StreamDelta`].  Unknown event types
    /// normalize to an empty delta; this must never fail.
    fn parse_stream_event(&self, event: &Value) -> StreamDelta;

    /// Parse a complete (non-streaming) response body.
    fn parse_response(&self, body: &Value) -> anyhow::Result<UniversalMessage>;

    /// Classify an HTTP failure.  The default is the shared taxonomy;
    /// variants may enrich the message.
    fn parse_error(&self, status: u16, body: &str) -> ProviderError {
        classify_http_error(status, body)
    }
}

// ─── Format resolution ────────────────────────────────────────────────────────

fn model_format_map() -> &'static RwLock<HashMap<String, EndpointFormat>> {
    static MAP: OnceLock<RwLock<HashMap<String, EndpointFormat>>> = OnceLock::new();
    MAP.get_or_init(|| {
        let mut m = HashMap::new();
        // Seed table: known model ids whose format differs from (or should
        // not depend on) their provider default.
        for id in ["gpt-5", "gpt-5-mini", "gpt-5-nano", "o3", "o4-mini", "codex-mini"] {
            m.insert(id.to_string(), EndpointFormat::Responses);
        }
        for id in ["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini"] {
            m.insert(id.to_string(), EndpointFormat::ChatCompletions);
        }
        for id in [
            "claude-opus-4-5",
            "claude-sonnet-4-5",
            "claude-haiku-4-5",
            "claude-3-5-sonnet-20241022",
            "claude-3-5-haiku-20241022",
        ] {
            m.insert(id.to_string(), EndpointFormat::AnthropicMessages);
        }
        RwLock::new(m)
    })
}

/// Extend the seeded id→format table at runtime (e.g. from config).
/// Never called during a run.
pub fn register_model_format(model_id: &str, format: EndpointFormat) {
    model_format_map()
        .write()
        .expect("model format map poisoned")
        .insert(model_id.to_string(), format);
}

/// `model.endpoint_format ?? MODEL_FORMAT_MAP[model.id] ?? provider.default_format`.
pub fn resolve_format(model: &ModelConfig, provider: &ProviderConfig) -> EndpointFormat {
    if let Some(f) = model.endpoint_format {
        return f;
    }
    if let Some(f) = model_format_map()
        .read()
        .expect("model format map poisoned")
        .get(&model.id)
    {
        return *f;
    }
    provider.default_format
}

/// The adapter instance for a format.  Adapters are stateless; one static
/// instance per variant serves all runs.
pub fn adapter_for(format: EndpointFormat) -> &'static dyn EndpointAdapter {
    static CHAT: ChatCompletionsAdapter = ChatCompletionsAdapter;
    static RESPONSES: ResponsesAdapter = ResponsesAdapter;
    static ANTHROPIC: AnthropicMessagesAdapter = AnthropicMessagesAdapter;
    match format {
        EndpointFormat::ChatCompletions => &CHAT,
        EndpointFormat::Responses => &RESPONSES,
        EndpointFormat::AnthropicMessages => &ANTHROPIC,
    }
}

/// Resolve the adapter for a `(model, provider)` pair.
pub fn resolve_adapter(
    model: &ModelConfig,
    provider: &ProviderConfig,
) -> &'static dyn EndpointAdapter {
    adapter_for(resolve_format(model, provider))
}

// ─── Header merging ───────────────────────────────────────────────────────────

/// Merge configured extra headers over `base`: provider-level first, then
/// model-level, so the model wins on conflict.  Header-name comparison is
/// case-insensitive.
///
/// Keys `__proto__`, `constructor`, and `prototype` are rejected, as are
/// non-string values — configured header maps arrive from untrusted
/// settings files.
pub fn merge_headers(
    mut base: Vec<(String, String)>,
    provider: &ProviderConfig,
    model: &ModelConfig,
) -> anyhow::Result<Vec<(String, String)>> {
    for extra in [&provider.extra_headers, &model.extra_headers] {
        for (name, value) in extra {
            if matches!(name.as_str(), "__proto__" | "constructor" | "prototype") {
                anyhow::bail!("forbidden header key: {name}");
            }
            let Some(value) = value.as_str() else {
                anyhow::bail!("header {name} must be a string");
            };
            if let Some(slot) = base.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                slot.1 = value.to_string();
            } else {
                base.push((name.clone(), value.to_string()));
            }
        }
    }
    Ok(base)
}

// ─── Output-token fitting ─────────────────────────────────────────────────────

/// Bytes the serialized request will occupy: messages + tools + system text.
pub fn estimate_input_bytes(req: &CompletionRequest) -> usize {
    let mut bytes = 0;
    for m in &req.messages {
        bytes += serde_json::to_string(m).map(|s| s.len()).unwrap_or(m.content.len());
    }
    for t in &req.tools {
        bytes += serde_json::to_string(t).map(|s| s.len()).unwrap_or(0);
    }
    if let Some(s) = &req.system {
        bytes += s.len();
    }
    bytes
}

/// Recompute the output-token cap so request + response fit the context
/// window: `max(MIN, min(requested, window − ⌈bytes/3.5⌉ − SAFETY))`.
/// Without a known window the requested value passes through.
pub fn fit_output_tokens(requested: u32, context_window: Option<u32>, input_bytes: usize) -> u32 {
    let Some(window) = context_window else {
        return requested;
    };
    let input_tokens = (input_bytes as f64 / 3.5).ceil() as i64;
    let available = window as i64 - input_tokens - SAFETY_BUFFER as i64;
    let capped = (requested as i64).min(available);
    capped.max(MIN_OUTPUT_TOKENS as i64) as u32
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider(format: EndpointFormat) -> ProviderConfig {
        ProviderConfig {
            id: "p".into(),
            name: String::new(),
            base_url: "https://api.example.com/v1".into(),
            api_key: Some("sk-test".into()),
            api_key_env: None,
            default_format: format,
            extra_headers: HashMap::new(),
        }
    }

    // ── Resolution precedence ─────────────────────────────────────────────────

    #[test]
    fn explicit_model_format_wins() {
        let mut m = ModelConfig::new("claude-sonnet-4-5");
        m.endpoint_format = Some(EndpointFormat::ChatCompletions);
        let p = provider(EndpointFormat::Responses);
        assert_eq!(resolve_format(&m, &p), EndpointFormat::ChatCompletions);
    }

    #[test]
    fn seeded_table_beats_provider_default() {
        let m = ModelConfig::new("claude-sonnet-4-5");
        let p = provider(EndpointFormat::ChatCompletions);
        assert_eq!(resolve_format(&m, &p), EndpointFormat::AnthropicMessages);
    }

    #[test]
    fn unknown_model_falls_back_to_provider_default() {
        let m = ModelConfig::new("totally-unknown-model");
        let p = provider(EndpointFormat::Responses);
        assert_eq!(resolve_format(&m, &p), EndpointFormat::Responses);
    }

    #[test]
    fn runtime_registration_extends_the_table() {
        let m = ModelConfig::new("my-local-model-tern-test");
        let p = provider(EndpointFormat::ChatCompletions);
        assert_eq!(resolve_format(&m, &p), EndpointFormat::ChatCompletions);
        register_model_format("my-local-model-tern-test", EndpointFormat::AnthropicMessages);
        assert_eq!(resolve_format(&m, &p), EndpointFormat::AnthropicMessages);
    }

    // ── Header merging ────────────────────────────────────────────────────────

    #[test]
    fn model_headers_override_provider_headers() {
        let mut p = provider(EndpointFormat::ChatCompletions);
        p.extra_headers.insert("X-Tier".into(), json!("provider"));
        let mut m = ModelConfig::new("m");
        m.extra_headers.insert("x-tier".into(), json!("model"));
        let merged = merge_headers(vec![], &p, &m).unwrap();
        assert_eq!(merged, vec![("X-Tier".to_string(), "model".to_string())]);
    }

    #[test]
    fn extra_headers_override_base() {
        let mut p = provider(EndpointFormat::ChatCompletions);
        p.extra_headers.insert("Authorization".into(), json!("Bearer other"));
        let m = ModelConfig::new("m");
        let base = vec![("Authorization".to_string(), "Bearer sk-test".to_string())];
        let merged = merge_headers(base, &p, &m).unwrap();
        assert_eq!(merged[0].1, "Bearer other");
    }

    #[test]
    fn prototype_pollution_keys_rejected() {
        for key in ["__proto__", "constructor", "prototype"] {
            let mut p = provider(EndpointFormat::ChatCompletions);
            p.extra_headers.insert(key.into(), json!("x"));
            let m = ModelConfig::new("m");
            assert!(merge_headers(vec![], &p, &m).is_err(), "{key} must be rejected");
        }
    }

    #[test]
    fn non_string_header_value_rejected() {
        let mut p = provider(EndpointFormat::ChatCompletions);
        p.extra_headers.insert("X-Num".into(), json!(42));
        let m = ModelConfig::new("m");
        assert!(merge_headers(vec![], &p, &m).is_err());
    }

    // ── Output-token fitting ──────────────────────────────────────────────────

    #[test]
    fn no_context_window_passes_request_through() {
        assert_eq!(fit_output_tokens(8192, None, 1_000_000), 8192);
    }

    #[test]
    fn large_input_shrinks_the_cap() {
        // 70_000 bytes ≈ 20_000 tokens; 32_000 − 20_000 − 2_000 = 10_000
        assert_eq!(fit_output_tokens(16_000, Some(32_000), 70_000), 10_000);
    }

    #[test]
    fn cap_never_drops_below_minimum() {
        assert_eq!(fit_output_tokens(16_000, Some(4_000), 1_000_000), MIN_OUTPUT_TOKENS);
    }

    #[test]
    fn small_request_is_untouched() {
        assert_eq!(fit_output_tokens(2_000, Some(200_000), 4_000), 2_000);
    }
}
