// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Outbound host gate for completion and fetch traffic.
//!
//! Requests may only leave the process toward a known provider hostname or
//! the local Ollama port.  A pattern of the form `*.domain` matches the
//! domain itself and any subdomain.

const ALLOWED_HOSTS: &[&str] = &[
    "api.openai.com",
    "api.anthropic.com",
    "*.openai.azure.com",
    "openrouter.ai",
    "api.groq.com",
    "api.mistral.ai",
    "api.deepseek.com",
    "api.together.xyz",
    "api.fireworks.ai",
    "api.x.ai",
    "generativelanguage.googleapis.com",
    "localhost:11434",
];

/// Returns `true` when `host` (optionally `host:port`) is an allowed
/// outbound destination.  Matching is exact, or suffix for `*.` patterns.
pub fn is_allowed_host(host: &str) -> bool {
    let host = host.to_lowercase();
    ALLOWED_HOSTS.iter().any(|pat| {
        if let Some(domain) = pat.strip_prefix("*.") {
            host == domain || host.ends_with(&format!(".{domain}"))
        } else {
            host == *pat
        }
    })
}

/// Extract the host (with a non-default port, if present) from a URL and
/// check it against the allow-list.
pub fn is_allowed_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    let Some(rest) = rest else { return false };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    if authority.is_empty() || authority.contains('@') {
        return false;
    }
    // Try host:port first (for entries like localhost:11434), then bare host.
    if is_allowed_host(authority) {
        return true;
    }
    let host = authority.split(':').next().unwrap_or("");
    is_allowed_host(host)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
