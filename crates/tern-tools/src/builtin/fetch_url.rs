// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::executor::{ExecutionContext, Tool};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_REDIRECTS: usize = 5;
const DEFAULT_MAX_CHARS: usize = 50_000;

pub struct FetchUrlTool;

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as readable text. HTML is \
         converted to plain text, JSON is pretty-printed. HTTP(S) only; \
         localhost and private addresses are refused."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The http(s) URL to fetch" },
                "max_chars": { "type": "integer", "description": "Maximum characters to return (default 50000)" }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'url'"))?;
        let max_chars = args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_CHARS as u64) as usize;

        debug!(url, "fetch_url tool");
        validate_fetch_url(url, ctx.tools_config.allow_any_fetch_host)?;

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            // Redirects are followed manually so every hop is re-validated.
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("tern-agent/1.0")
            .build()?;

        let mut current = url.to_string();
        for _hop in 0..=MAX_REDIRECTS {
            let response = client.get(&current).send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| anyhow::anyhow!("redirect without a Location header"))?;
                current = absolutize(&current, location)?;
                validate_fetch_url(&current, ctx.tools_config.allow_any_fetch_host)?;
                continue;
            }
            if !status.is_success() {
                anyhow::bail!("HTTP {status} from {current}");
            }

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_lowercase();
            let body = response.text().await?;
            let content = if content_type.contains("html") {
                html2text::from_read(body.as_bytes(), 100)
            } else if content_type.contains("json") {
                serde_json::from_str::<Value>(&body)
                    .and_then(|v| serde_json::to_string_pretty(&v))
                    .unwrap_or(body)
            } else {
                body
            };

            return Ok(truncate_chars(&content, max_chars));
        }
        anyhow::bail!("too many redirects (limit {MAX_REDIRECTS})")
    }
}

/// SSRF gate: http(s) only, no userinfo, no loopback/private/link-local
/// hosts.  `allow_any_host` skips the private-address check for hosts the
/// operator trusts (e.g. an intranet docs server) but keeps scheme checks.
fn validate_fetch_url(url: &str, allow_any_host: bool) -> anyhow::Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| anyhow::anyhow!("only http(s) URLs are supported"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    if authority.is_empty() {
        anyhow::bail!("URL has no host");
    }
    if authority.contains('@') {
        anyhow::bail!("userinfo in URLs is not allowed");
    }
    if allow_any_host {
        return Ok(());
    }
    let host = authority.split(':').next().unwrap_or("").to_lowercase();
    if host == "localhost" || host == "0.0.0.0" || host == "[::1]" || host == "::1" {
        anyhow::bail!("refusing to fetch loopback address {host}");
    }
    if is_private_ipv4(&host) {
        anyhow::bail!("refusing to fetch private address {host}");
    }
    Ok(())
}

fn is_private_ipv4(host: &str) -> bool {
    let Ok(ip) = host.parse::<std::net::Ipv4Addr>() else {
        return false;
    };
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
}

/// Resolve a possibly-relative redirect target against the current URL.
fn absolutize(base: &str, location: &str) -> anyhow::Result<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Ok(location.to_string());
    }
    if let Some(path) = location.strip_prefix('/') {
        let scheme_end = base.find("://").ok_or_else(|| anyhow::anyhow!("bad base URL"))?;
        let authority_end = base[scheme_end + 3..]
            .find('/')
            .map(|i| scheme_end + 3 + i)
            .unwrap_or(base.len());
        return Ok(format!("{}/{}", &base[..authority_end], path));
    }
    anyhow::bail!("unsupported redirect target: {location}")
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }
    let mut cut = max_chars;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...[truncated at {max_chars} chars; total {} chars]",
        &content[..cut],
        content.len()
    )
}
