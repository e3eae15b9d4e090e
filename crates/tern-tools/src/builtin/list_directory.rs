// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Hidden entries and node_modules \
         are filtered; directories come first, each suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" }
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
        let path = validate_path(raw, ctx, "list_directory").await?;
        debug!(path = %path.display(), "list_directory tool");

        let mut dirs: Vec<String> = Vec::new();
        let mut files: Vec<String> = Vec::new();
        let mut reader = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name == "node_modules" {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                dirs.push(format!("{name}/"));
            } else {
                files.push(name);
            }
        }

        let collate = |a: &String, b: &String| {
            a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
        };
        dirs.sort_by(collate);
        files.sort_by(collate);

        if dirs.is_empty() && files.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        Ok(dirs.into_iter().chain(files).collect::<Vec<_>>().join("\n"))
    }
}
