// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Stateful stream pipeline: SSE line reassembly → JSON decoding →
//! adapter normalization → accumulation.
//!
//! One [`StreamProcessor`] is created per completion call, fed raw transport
//! chunks, and dropped with the call.  SSE events can be split across TCP
//! packets at arbitrary byte boundaries, so only complete lines (terminated
//! by `\n`) are parsed; the remainder carries over to the next chunk.

use std::collections::BTreeMap;

use tracing::warn;

use crate::adapter::EndpointAdapter;
use crate::repair::finalize_arguments;
use crate::types::{FinishReason, StreamDelta, ToolCall, Usage};

/// Accumulated result of one completed stream.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub content: String,
    pub reasoning_content: String,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// Finalized tool calls in index order, arguments decoded (with repair
    /// fallback) to JSON objects.
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

pub struct StreamProcessor<'a> {
    adapter: &'a dyn EndpointAdapter,
    /// Carry-over buffer for the trailing incomplete SSE line.
    sse_buf: String,
    content: String,
    reasoning: String,
    /// Latches the last non-null finish reason.
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    /// Keyed by the provider-chosen tool-call index within this stream.
    pending: BTreeMap<u32, PendingToolCall>,
    finished: Option<StreamOutcome>,
}

impl<'a> StreamProcessor<'a> {
    pub fn new(adapter: &'a dyn EndpointAdapter) -> Self {
        Self {
            adapter,
            sse_buf: String::new(),
            content: String::new(),
            reasoning: String::new(),
            finish_reason: None,
            usage: None,
            pending: BTreeMap::new(),
            finished: None,
        }
    }

    /// Feed one transport chunk.  Returns the normalized deltas decoded from
    /// it (empty deltas filtered out) so the caller can emit incremental
    /// events; accumulation happens internally.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamDelta> {
        self.sse_buf.push_str(&String::from_utf8_lossy(chunk));

        let mut deltas = Vec::new();
        // Everything up to and including the last newline is complete.
        while let Some(pos) = self.sse_buf.find('\n') {
            let line: String = self.sse_buf.drain(..=pos).collect();
            if let Some(delta) = self.process_line(&line) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Drain any buffered trailer with the same per-line rules.
    fn flush(&mut self) -> Vec<StreamDelta> {
        let rest = std::mem::take(&mut self.sse_buf);
        self.process_line(&rest).into_iter().collect()
    }

    /// Stage 1 + 2 + 3 for one line: SSE filtering, JSON decoding (malformed
    /// payloads silently dropped), adapter normalization, accumulation.
    fn process_line(&mut self, line: &str) -> Option<StreamDelta> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') || line.starts_with("event:") {
            return None;
        }
        let payload = line.strip_prefix("data:")?.trim_start();
        if payload == "[DONE]" {
            return None;
        }
        // A partial trailer, a keepalive, or server-side truncation must not
        // terminate the stream.
        let value: serde_json::Value = serde_json::from_str(payload).ok()?;
        let delta = self.adapter.parse_stream_event(&value);
        if delta.is_empty() {
            return None;
        }
        self.apply(&delta);
        Some(delta)
    }

    fn apply(&mut self, delta: &StreamDelta) {
        if let Some(text) = &delta.content {
            self.content.push_str(text);
        }
        if let Some(text) = &delta.reasoning_content {
            self.reasoning.push_str(text);
        }
        if let Some(reason) = delta.finish_reason {
            self.finish_reason = Some(reason);
        }
        if let Some(u) = &delta.usage {
            // Additive: Anthropic splits prompt/completion usage across two
            // event types; chat-completions sends one terminal chunk.
            self.usage.get_or_insert_with(Usage::default).add(u);
        }
        for tc in delta.tool_calls.as_deref().unwrap_or_default() {
            let entry = self.pending.entry(tc.index).or_default();
            if let Some(id) = &tc.id {
                entry.id = id.clone();
            }
            if let Some(name) = &tc.name {
                entry.name = name.clone();
            }
            entry.args_buf.push_str(&tc.arguments);
        }
    }

    /// Finalize the stream: drain the trailer, decode pending tool-call
    /// argument buffers (repair fallback, `{}` substitution), and snapshot.
    /// Safe to call more than once; later calls return the same snapshot.
    pub fn finish(&mut self) -> StreamOutcome {
        if let Some(done) = &self.finished {
            return done.clone();
        }
        self.flush();

        let mut tool_calls = Vec::with_capacity(self.pending.len());
        for (index, pending) in std::mem::take(&mut self.pending) {
            if pending.name.is_empty() {
                warn!(index, "dropping tool call with no name; cannot dispatch");
                continue;
            }
            let id = if pending.id.is_empty() {
                // An empty id would corrupt pairing on the next request.
                format!("tc_synthetic_{index}")
            } else {
                pending.id
            };
            tool_calls.push(ToolCall {
                id,
                name: pending.name,
                arguments: finalize_arguments(&pending.args_buf),
            });
        }

        let outcome = StreamOutcome {
            content: std::mem::take(&mut self.content),
            reasoning_content: std::mem::take(&mut self.reasoning),
            finish_reason: self.finish_reason,
            usage: self.usage,
            tool_calls,
        };
        self.finished = Some(outcome.clone());
        outcome
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapter_for;
    use tern_config::EndpointFormat;

    fn chat_processor() -> StreamProcessor<'static> {
        StreamProcessor::new(adapter_for(EndpointFormat::ChatCompletions))
    }

    fn anthropic_processor() -> StreamProcessor<'static> {
        StreamProcessor::new(adapter_for(EndpointFormat::AnthropicMessages))
    }

    const CHAT_TRANSCRIPT: &str = concat!(
        ": keepalive\n",
        "event: chunk\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        "data: [DONE]\n",
    );

    #[test]
    fn whole_transcript_accumulates_content() {
        let mut p = chat_processor();
        p.feed(CHAT_TRANSCRIPT.as_bytes());
        let out = p.finish();
        assert_eq!(out.content, "Hello");
        assert_eq!(out.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn byte_split_permutations_yield_identical_outcome() {
        // Feeding any byte-split of the transcript equals feeding it whole.
        let whole = {
            let mut p = chat_processor();
            p.feed(CHAT_TRANSCRIPT.as_bytes());
            p.finish()
        };
        for split in [1usize, 3, 7, 16, 41] {
            let mut p = chat_processor();
            for chunk in CHAT_TRANSCRIPT.as_bytes().chunks(split) {
                p.feed(chunk);
            }
            let out = p.finish();
            assert_eq!(out.content, whole.content, "split={split}");
            assert_eq!(out.finish_reason, whole.finish_reason, "split={split}");
        }
    }

    #[test]
    fn malformed_payload_is_dropped_silently() {
        let mut p = chat_processor();
        p.feed(b"data: {not valid json\n");
        p.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n");
        assert_eq!(p.finish().content, "ok");
    }

    #[test]
    fn comment_event_and_done_lines_are_filtered() {
        let mut p = chat_processor();
        let deltas = p.feed(b": ping\nevent: completion\ndata: [DONE]\n");
        assert!(deltas.is_empty());
    }

    #[test]
    fn arguments_split_across_fragments_reassemble() {
        // Tool-call accumulator law: any fragmentation of the argument JSON
        // at one index yields the same final object.
        let args = r#"{"path":"/p/a.txt","content":"x"}"#;
        for parts in [1usize, 2, 3, 6] {
            let mut p = anthropic_processor();
            p.feed(
                b"data: {\"type\":\"content_block_start\",\"index\":0,\
                  \"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"write_file\"}}\n",
            );
            let chunk_len = args.len().div_ceil(parts);
            for frag in args.as_bytes().chunks(chunk_len) {
                let escaped = String::from_utf8_lossy(frag).replace('\\', "\\\\").replace('"', "\\\"");
                let line = format!(
                    "data: {{\"type\":\"content_block_delta\",\"index\":0,\
                     \"delta\":{{\"type\":\"input_json_delta\",\"partial_json\":\"{escaped}\"}}}}\n"
                );
                p.feed(line.as_bytes());
            }
            p.feed(
                b"data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"}}\n",
            );
            let out = p.finish();
            assert_eq!(out.finish_reason, Some(FinishReason::ToolCalls));
            assert_eq!(out.tool_calls.len(), 1, "parts={parts}");
            assert_eq!(out.tool_calls[0].arguments["path"], "/p/a.txt");
            assert_eq!(out.tool_calls[0].arguments["content"], "x");
        }
    }

    #[test]
    fn empty_arguments_buffer_finalizes_to_empty_object() {
        let mut p = anthropic_processor();
        p.feed(
            b"data: {\"type\":\"content_block_start\",\"index\":0,\
              \"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"get_git_diff\"}}\n",
        );
        let out = p.finish();
        assert_eq!(out.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn unbalanced_arguments_never_panic() {
        let mut p = chat_processor();
        p.feed(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\
              \"function\":{\"name\":\"write_file\",\"arguments\":\"{\\\"path\\\":\\\"/p\"}}]}}]}\n",
        );
        let out = p.finish();
        // Repair closes the string and brace.
        assert_eq!(out.tool_calls[0].arguments["path"], "/p");
    }

    #[test]
    fn usage_sums_across_anthropic_event_types() {
        let mut p = anthropic_processor();
        p.feed(b"data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":100}}}\n");
        p.feed(b"data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":7}}\n");
        let u = p.finish().usage.unwrap();
        assert_eq!(u.prompt_tokens, 100);
        assert_eq!(u.completion_tokens, 7);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut p = chat_processor();
        p.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n");
        let first = p.finish();
        let second = p.finish();
        assert_eq!(first.content, second.content);
        assert_eq!(second.content, "x");
    }

    #[test]
    fn flush_handles_trailer_without_newline() {
        let mut p = chat_processor();
        p.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        assert_eq!(p.finish().content, "tail");
    }

    #[test]
    fn tool_calls_return_in_index_order() {
        let mut p = chat_processor();
        for (idx, name) in [(1u32, "second"), (0u32, "first")] {
            let line = format!(
                "data: {{\"choices\":[{{\"delta\":{{\"tool_calls\":[{{\"index\":{idx},\
                 \"id\":\"c{idx}\",\"function\":{{\"name\":\"{name}\",\"arguments\":\"{{}}\"}}}}]}}}}]}}\n"
            );
            p.feed(line.as_bytes());
        }
        let out = p.finish();
        assert_eq!(out.tool_calls[0].name, "first");
        assert_eq!(out.tool_calls[1].name, "second");
    }

    #[test]
    fn missing_id_gets_synthetic_fallback() {
        let mut p = chat_processor();
        p.feed(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\
              \"function\":{\"name\":\"ls\",\"arguments\":\"{}\"}}]}}]}\n",
        );
        let out = p.finish();
        assert_eq!(out.tool_calls[0].id, "tc_synthetic_0");
    }

    #[test]
    fn nameless_call_is_dropped() {
        let mut p = chat_processor();
        p.feed(
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\
              \"function\":{\"arguments\":\"{}\"}}]}}]}\n",
        );
        assert!(p.finish().tool_calls.is_empty());
    }
}
