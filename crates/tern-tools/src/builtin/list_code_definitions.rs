// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Language-aware scan for top-level definitions (functions, classes,
//! types).  Regex-based — a quick map of a file, not a parser.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

const MAX_SCAN_BYTES: u64 = 2 * 1024 * 1024;

pub struct ListCodeDefinitionsTool;

/// Line-anchored definition patterns per language family.
fn patterns_for(extension: &str) -> Vec<(&'static str, Regex)> {
    let compile = |p: &str| Regex::new(p).expect("definition pattern");
    match extension {
        "rs" => vec![
            ("fn", compile(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)")),
            ("struct", compile(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(\w+)")),
            ("enum", compile(r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(\w+)")),
            ("trait", compile(r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+(\w+)")),
            ("impl", compile(r"^\s*impl(?:<[^>]*>)?\s+([\w:]+)")),
        ],
        "ts" | "tsx" | "js" | "jsx" | "mjs" => vec![
            ("function", compile(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)")),
            ("class", compile(r"^\s*(?:export\s+)?(?:default\s+)?class\s+(\w+)")),
            ("interface", compile(r"^\s*(?:export\s+)?interface\s+(\w+)")),
            ("const", compile(r"^\s*(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s*)?\(")),
        ],
        "py" => vec![
            ("def", compile(r"^(?:async\s+)?def\s+(\w+)")),
            ("class", compile(r"^class\s+(\w+)")),
        ],
        "go" => vec![
            ("func", compile(r"^func\s+(?:\([^)]*\)\s+)?(\w+)")),
            ("type", compile(r"^type\s+(\w+)")),
        ],
        _ => vec![],
    }
}

#[async_trait]
impl Tool for ListCodeDefinitionsTool {
    fn name(&self) -> &str {
        "list_code_definitions"
    }

    fn description(&self) -> &str {
        "List top-level definitions (functions, classes, types) in a source \
         file with their line numbers. Supports Rust, TypeScript/JavaScript, \
         Python, and Go."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Source file to scan" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let raw = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'path'"))?;
        let path = validate_path(raw, ctx, "list_code_definitions").await?;
        debug!(path = %path.display(), "list_code_definitions tool");

        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > MAX_SCAN_BYTES {
            anyhow::bail!("{} is too large to scan", path.display());
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let patterns = patterns_for(&extension);
        if patterns.is_empty() {
            anyhow::bail!("unsupported file type: .{extension}");
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut lines_out = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            for (kind, re) in &patterns {
                if let Some(caps) = re.captures(line) {
                    if let Some(name) = caps.get(1) {
                        lines_out.push(format!("{}:{} {}", lineno + 1, kind, name.as_str()));
                        break;
                    }
                }
            }
        }

        if lines_out.is_empty() {
            return Ok("(no definitions found)".to_string());
        }
        Ok(lines_out.join("\n"))
    }
}
