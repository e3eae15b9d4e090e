// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Coarse classification of a provider failure, derived from HTTP status
/// and response body.  The agent loop terminates the run on any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    Billing,
    RateLimit,
    Server,
    Network,
    Timeout,
    Unknown,
}

impl ProviderErrorKind {
    /// Upper-case tag used in the `[TYPE] message` rendering.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::Billing => "BILLING",
            Self::RateLimit => "RATE_LIMIT",
            Self::Server => "SERVER",
            Self::Network => "NETWORK",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// A classified provider or transport failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{}] {message}", kind.tag())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// HTTP status when the failure came from a response.
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), status: None }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }
}

/// Classify an HTTP failure from its status code and body text.
///
/// Body matching is case-insensitive substring search; the status code wins
/// when both disagree (a 401 with "rate limit" in the body is still auth).
pub fn classify_http_error(status: u16, body: &str) -> ProviderError {
    let lower = body.to_lowercase();
    let kind = match status {
        401 => ProviderErrorKind::Auth,
        402 => ProviderErrorKind::Billing,
        429 => ProviderErrorKind::RateLimit,
        s if s >= 500 => ProviderErrorKind::Server,
        _ => {
            if lower.contains("unauthorized") || lower.contains("invalid api key") {
                ProviderErrorKind::Auth
            } else if lower.contains("billing")
                || lower.contains("payment")
                || lower.contains("insufficient")
            {
                ProviderErrorKind::Billing
            } else if lower.contains("rate limit") {
                ProviderErrorKind::RateLimit
            } else if lower.contains("unavailable") || lower.contains("overloaded") {
                ProviderErrorKind::Server
            } else {
                ProviderErrorKind::Unknown
            }
        }
    };

    let message = extract_error_message(body)
        .unwrap_or_else(|| format!("provider returned HTTP {status}"));
    ProviderError { kind, message, status: Some(status) }
}

/// Pull a human-readable message out of the common error-body shapes:
/// `{"error": {"message": ...}}`, `{"error": "..."}`, `{"message": ...}`.
/// Falls back to the raw body when it is short and non-empty.
fn extract_error_message(body: &str) -> Option<String> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(m) = v["error"]["message"].as_str() {
            return Some(m.to_string());
        }
        if let Some(m) = v["error"].as_str() {
            return Some(m.to_string());
        }
        if let Some(m) = v["message"].as_str() {
            return Some(m.to_string());
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() <= 500 {
        return Some(trimmed.to_string());
    }
    None
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
