// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Abstract HTTP boundary the core binds to.
//!
//! The runtime never talks to the network directly: it depends on an
//! [`HttpTransport`] with exactly two operations, `request` and
//! `stream_request`.  The host environment supplies the production
//! implementation ([`ReqwestTransport`]); tests supply a scripted one.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::hosts;

/// Inactivity timeout between streamed chunks.
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// One callback invocation during a streaming request.
#[derive(Debug, Clone)]
pub enum StreamData {
    /// A body chunk arrived.
    Chunk(Bytes),
    /// The stream ended normally.
    Done,
    /// The transport failed mid-stream.
    Error(String),
}

/// Outcome of a non-streaming request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub ok: bool,
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

/// Status of a streaming request after headers arrived.
///
/// When `ok` is false the transport has drained the error body into
/// `error_body` so the caller can classify it; no chunk callbacks fire.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub ok: bool,
    pub status: u16,
    pub error_body: Option<String>,
}

/// Chunk callback.  Returning `false` cancels the stream at the next chunk
/// boundary — this is the transport-level cancellation handle.
pub type OnStreamData<'a> = &'a mut (dyn FnMut(StreamData) -> bool + Send);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Non-streaming request.
    async fn request(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Option<Value>,
    ) -> anyhow::Result<HttpResponse>;

    /// Streaming request.  `on_data` is invoked for each byte chunk, then
    /// once with [`StreamData::Done`], or with [`StreamData::Error`] on
    /// transport failure.
    async fn stream_request(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Value,
        on_data: OnStreamData<'_>,
    ) -> anyhow::Result<StreamStatus>;
}

/// Production transport over reqwest with the outbound host gate applied.
pub struct ReqwestTransport {
    client: reqwest::Client,
    /// Skip the host allow-list (used by hosts that manage their own gate).
    allow_any_host: bool,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), allow_any_host: false }
    }

    pub fn allowing_any_host() -> Self {
        Self { client: reqwest::Client::new(), allow_any_host: true }
    }

    fn check_host(&self, url: &str) -> anyhow::Result<()> {
        if !self.allow_any_host && !hosts::is_allowed_url(url) {
            anyhow::bail!("outbound host not in allow-list: {url}");
        }
        Ok(())
    }

    fn build(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
    ) -> anyhow::Result<reqwest::RequestBuilder> {
        let method: reqwest::Method = method.parse().context("invalid HTTP method")?;
        let mut req = self.client.request(method, url);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        Ok(req)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Option<Value>,
    ) -> anyhow::Result<HttpResponse> {
        self.check_host(url)?;
        let mut req = self.build(url, method, headers)?;
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.context("request failed")?;
        let status = resp.status().as_u16();
        let ok = resp.status().is_success();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp.text().await.unwrap_or_default();
        Ok(HttpResponse { ok, status, body, headers })
    }

    async fn stream_request(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        body: Value,
        on_data: OnStreamData<'_>,
    ) -> anyhow::Result<StreamStatus> {
        self.check_host(url)?;
        let req = self.build(url, method, headers)?.json(&body);
        let resp = req.send().await.context("stream request failed")?;
        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let error_body = resp.text().await.unwrap_or_default();
            return Ok(StreamStatus { ok: false, status, error_body: Some(error_body) });
        }

        debug!(url, status, "stream opened");
        let mut byte_stream = resp.bytes_stream();
        loop {
            // Enforce the inactivity timeout between chunks, not end-to-end:
            // a slow generation is fine as long as bytes keep flowing.
            let next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, byte_stream.next()).await;
            match next {
                Err(_) => {
                    on_data(StreamData::Error("stream inactivity timeout".into()));
                    anyhow::bail!("stream inactivity timeout after {STREAM_IDLE_TIMEOUT:?}");
                }
                Ok(None) => {
                    on_data(StreamData::Done);
                    break;
                }
                Ok(Some(Err(e))) => {
                    on_data(StreamData::Error(e.to_string()));
                    return Err(anyhow::Error::new(e).context("stream read failed"));
                }
                Ok(Some(Ok(chunk))) => {
                    if !on_data(StreamData::Chunk(chunk)) {
                        debug!(url, "stream cancelled by consumer");
                        break;
                    }
                }
            }
        }
        Ok(StreamStatus { ok: true, status, error_body: None })
    }
}
