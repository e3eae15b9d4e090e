// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

/// Dispatches into the host-provided linter integration.
pub struct LintFileTool;

#[async_trait]
impl Tool for LintFileTool {
    fn name(&self) -> &str {
        "lint_file"
    }

    fn description(&self) -> &str {
        "Run the project's configured linter on one file and return its diagnostics."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to lint" }
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
        let path = validate_path(raw, ctx, "lint_file").await?;
        debug!(path = %path.display(), "lint_file tool");

        let linter = ctx
            .linter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("lint service not configured"))?;
        linter.lint(&path).await
    }
}
