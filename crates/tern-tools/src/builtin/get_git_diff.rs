// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use tern_config::AgentMode;

use crate::builtin::execute_command::run_command_line;
use crate::executor::{ExecutionContext, Tool};

pub struct GetGitDiffTool;

#[async_trait]
impl Tool for GetGitDiffTool {
    fn name(&self) -> &str {
        "get_git_diff"
    }

    fn description(&self) -> &str {
        "Show the unstaged working-tree diff of the project (git diff)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Builder, AgentMode::Planner]
    }

    async fn execute(&self, _args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let out = run_command_line("git diff", None, ctx).await?;
        if out.trim().is_empty() || out.starts_with("[exit 0]") {
            return Ok("(no unstaged changes)".to_string());
        }
        Ok(out)
    }
}
