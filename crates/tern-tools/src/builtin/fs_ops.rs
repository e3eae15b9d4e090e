// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The small mutating filesystem tools: `create_directory`, `delete_file`,
//! `move_file`.  All three validate every path they touch and are limited
//! to builder mode.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tern_config::AgentMode;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

pub struct CreateDirectoryTool;

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to create" }
            },
            "required": ["path"],
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
        let path = validate_path(raw, ctx, "create_directory").await?;
        debug!(path = %path.display(), "create_directory tool");
        tokio::fs::create_dir_all(&path).await?;
        Ok(format!("Created {}", path.display()))
    }
}

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file. Directories are not removed by this tool."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to delete" }
            },
            "required": ["path"],
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
        let path = validate_path(raw, ctx, "delete_file").await?;
        debug!(path = %path.display(), "delete_file tool");

        let meta = tokio::fs::metadata(&path).await?;
        if meta.is_dir() {
            anyhow::bail!("{} is a directory; delete_file only removes files", path.display());
        }
        tokio::fs::remove_file(&path).await?;
        Ok(format!("Deleted {}", path.display()))
    }
}

pub struct MoveFileTool;

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move or rename a file. Both source and destination are validated; \
         parent directories of the destination are created as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source": { "type": "string", "description": "Existing file" },
                "destination": { "type": "string", "description": "New path" }
            },
            "required": ["source", "destination"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Builder]
    }

    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let src_raw = args
            .get("source")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'source'"))?;
        let dst_raw = args
            .get("destination")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'destination'"))?;
        let src = validate_path(src_raw, ctx, "move_file").await?;
        let dst = validate_path(dst_raw, ctx, "move_file").await?;
        debug!(from = %src.display(), to = %dst.display(), "move_file tool");

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&src, &dst).await?;
        Ok(format!("Moved {} to {}", src.display(), dst.display()))
    }
}
