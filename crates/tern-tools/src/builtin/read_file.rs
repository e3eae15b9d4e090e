// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

/// Largest file `read_file` will return.
pub const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its full content. \
         Fails on directories and on files larger than 2 MB."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read" }
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
        let path = validate_path(raw, ctx, "read_file").await?;
        debug!(path = %path.display(), "read_file tool");

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| anyhow::anyhow!("cannot stat {}: {e}", path.display()))?;
        if meta.is_dir() {
            anyhow::bail!("{} is a directory, not a file", path.display());
        }
        if meta.len() > MAX_READ_BYTES {
            anyhow::bail!(
                "{} is {} bytes; the limit is {} bytes",
                path.display(),
                meta.len(),
                MAX_READ_BYTES
            );
        }

        let bytes = tokio::fs::read(&path).await?;
        String::from_utf8(bytes)
            .map_err(|_| anyhow::anyhow!("{} is not valid UTF-8", path.display()))
    }
}
