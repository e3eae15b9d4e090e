// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tern_config::AgentMode;

use crate::builtin::write_file::atomic_write;
use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

pub struct StrReplaceTool;

#[async_trait]
impl Tool for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of old_str with new_str in a file. \
         Fails when old_str is absent or matches more than once — include \
         enough surrounding context to make the match unique."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old_str": { "type": "string", "description": "Exact text to replace (must be unique in the file)" },
                "new_str": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_str", "new_str"],
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
        let old_str = args
            .get("old_str")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'old_str'"))?;
        let new_str = args
            .get("new_str")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'new_str'"))?;
        if old_str.is_empty() {
            anyhow::bail!("old_str must not be empty");
        }

        let path = validate_path(raw, ctx, "str_replace").await?;
        debug!(path = %path.display(), "str_replace tool");

        let content = tokio::fs::read_to_string(&path).await?;
        let count = content.matches(old_str).count();
        match count {
            0 => anyhow::bail!("old_str not found in {}", path.display()),
            1 => {}
            n => anyhow::bail!(
                "old_str occurs {n} times in {}; it must match exactly once",
                path.display()
            ),
        }

        let updated = content.replacen(old_str, new_str, 1);
        atomic_write(&path, &updated).await?;
        Ok(format!("Replaced 1 occurrence in {}", path.display()))
    }
}
