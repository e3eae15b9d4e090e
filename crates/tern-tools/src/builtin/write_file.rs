// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tern_config::AgentMode;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

pub struct WriteFileTool;

/// Write `content` to `path` atomically: the bytes land in a temp file in
/// the same directory, which is then renamed over the target.  A partial
/// write never leaves a torn file behind — the temp file is unlinked on
/// failure.
pub(crate) async fn atomic_write(path: &Path, content: &str) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", path.display()))?;
    tokio::fs::create_dir_all(parent).await?;

    let parent = parent.to_path_buf();
    let path = path.to_path_buf();
    let content = content.to_string();
    // NamedTempFile unlinks itself on drop, which covers the failure path.
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path)?;
        Ok(())
    })
    .await??;
    Ok(())
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent \
         directories are created as needed; the write is atomic."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Destination file path" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Builder]
    }

    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let raw = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'path'"))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'content'"))?;
        let path = validate_path(raw, ctx, "write_file").await?;
        debug!(path = %path.display(), bytes = content.len(), "write_file tool");

        atomic_write(&path, content).await?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}
