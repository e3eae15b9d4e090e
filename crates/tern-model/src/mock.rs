// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted transport for tests.
//!
//! Each call to `stream_request` pops the next script from the queue and
//! replays it through the chunk callback, so agent-loop and adapter tests
//! can specify exact byte sequences — including tool calls and provider
//! errors — without network access.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::transport::{HttpResponse, HttpTransport, OnStreamData, StreamData, StreamStatus};

/// One scripted reaction to a streaming request.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Replay an SSE body, split into chunks of `chunk_size` bytes.
    Sse { body: String, chunk_size: usize },
    /// Respond with a non-2xx status and error body (no chunks fire).
    HttpError { status: u16, body: String },
    /// Fail at the transport level before any bytes arrive.
    TransportError(String),
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<StreamScript>>,
    /// Every request body seen, for assertions on what was sent.
    pub requests: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<StreamScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// SSE body for a chat-completions text turn ending in `stop`.
    pub fn sse_text(text: &str) -> String {
        let mut body = String::new();
        for piece in split_pieces(text) {
            let chunk = serde_json::json!({"choices": [{"delta": {"content": piece}}]});
            body.push_str(&format!("data: {chunk}\n"));
        }
        body.push_str(
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        );
        body.push_str("data: [DONE]\n");
        body
    }

    /// SSE body for a chat-completions turn that requests one tool call,
    /// with the argument JSON split across several fragments.
    pub fn sse_tool_call(id: &str, name: &str, args_json: &str) -> String {
        let mut body = String::new();
        let open = serde_json::json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": id, "function": {"name": name, "arguments": ""}}
        ]}}]});
        body.push_str(&format!("data: {open}\n"));
        for piece in split_pieces(args_json) {
            let frag = serde_json::json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": piece}}
            ]}}]});
            body.push_str(&format!("data: {frag}\n"));
        }
        body.push_str(
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n",
        );
        body.push_str("data: [DONE]\n");
        body
    }

    pub fn script_text(text: &str) -> StreamScript {
        StreamScript::Sse { body: Self::sse_text(text), chunk_size: 17 }
    }

    pub fn script_tool_call(id: &str, name: &str, args_json: &str) -> StreamScript {
        StreamScript::Sse {
            body: Self::sse_tool_call(id, name, args_json),
            chunk_size: 17,
        }
    }
}

/// Split a string into small pieces at char boundaries so scripted streams
/// exercise the reassembly path.
fn split_pieces(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut piece = String::new();
    for c in s.chars() {
        piece.push(c);
        if piece.len() >= 6 {
            out.push(std::mem::take(&mut piece));
        }
    }
    if !piece.is_empty() {
        out.push(piece);
    }
    out
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn request(
        &self,
        url: &str,
        _method: &str,
        _headers: &[(String, String)],
        body: Option<Value>,
    ) -> anyhow::Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.unwrap_or(Value::Null)));
        Ok(HttpResponse { ok: true, status: 200, body: "{}".into(), headers: vec![] })
    }

    async fn stream_request(
        &self,
        url: &str,
        _method: &str,
        _headers: &[(String, String)],
        body: Value,
        on_data: OnStreamData<'_>,
    ) -> anyhow::Result<StreamStatus> {
        self.requests.lock().unwrap().push((url.to_string(), body));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StreamScript::TransportError("script queue exhausted".into()));

        match script {
            StreamScript::Sse { body, chunk_size } => {
                for chunk in body.as_bytes().chunks(chunk_size.max(1)) {
                    if !on_data(StreamData::Chunk(Bytes::copy_from_slice(chunk))) {
                        return Ok(StreamStatus { ok: true, status: 200, error_body: None });
                    }
                }
                on_data(StreamData::Done);
                Ok(StreamStatus { ok: true, status: 200, error_body: None })
            }
            StreamScript::HttpError { status, body } => {
                Ok(StreamStatus { ok: false, status, error_body: Some(body) })
            }
            StreamScript::TransportError(msg) => anyhow::bail!(msg),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
