// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use tern_config::AgentMode;

use crate::executor::{ExecutionContext, Tool};
use crate::security::command::validate_command;
use crate::security::path::validate_path;

/// Mirrored stdout cap.
const STDOUT_CAP: usize = 50 * 1024;
/// Mirrored stderr cap.
const STDERR_CAP: usize = 10 * 1024;

pub struct ExecuteCommandTool;

/// Validate and run one command line with no shell, captured output, and a
/// wall timeout.  Shared with `get_git_diff`.
pub(crate) async fn run_command_line(
    command: &str,
    cwd: Option<PathBuf>,
    ctx: &ExecutionContext,
) -> anyhow::Result<String> {
    let tokens = validate_command(command, &ctx.tools_config.extra_allowed_commands)?;
    let timeout = Duration::from_secs(ctx.tools_config.command_timeout_secs);

    let mut cmd = build_command(&tokens);
    cmd.stdin(std::process::Stdio::null());
    if let Some(dir) = cwd.or_else(|| ctx.project_root.clone()) {
        cmd.current_dir(dir);
    }

    debug!(command, "execute_command tool");
    let child = cmd
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            // Dropping the output future kills the child (kill_on_drop).
            anyhow::bail!("command timed out after {}s", timeout.as_secs());
        }
    };

    let stdout = cap(&String::from_utf8_lossy(&output.stdout), STDOUT_CAP);
    let stderr = cap(&String::from_utf8_lossy(&output.stderr), STDERR_CAP);

    let mut content = String::new();
    if !stdout.is_empty() {
        content.push_str(&stdout);
    }
    if !stderr.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("[stderr]\n");
        content.push_str(&stderr);
    }
    let code = output.status.code().unwrap_or(-1);
    if content.is_empty() {
        content = format!("[exit {code}]");
    }
    if !output.status.success() {
        anyhow::bail!("[exit {code}]\n{content}");
    }
    Ok(content)
}

#[cfg(not(windows))]
fn build_command(tokens: &[String]) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(&tokens[0]);
    cmd.args(&tokens[1..]);
    cmd.kill_on_drop(true);
    cmd
}

/// On Windows, batch scripts must never be spawned directly: resolve the
/// executable through PATH with the usual extension probe, and route
/// `.cmd`/`.bat` targets through `cmd.exe /c`.
#[cfg(windows)]
fn build_command(tokens: &[String]) -> tokio::process::Command {
    let resolved = resolve_windows_executable(&tokens[0]);
    let lower = resolved.to_lowercase();
    let mut cmd = if lower.ends_with(".cmd") || lower.ends_with(".bat") {
        let mut c = tokio::process::Command::new("cmd.exe");
        c.arg("/c").arg(&resolved);
        c
    } else {
        tokio::process::Command::new(&resolved)
    };
    cmd.args(&tokens[1..]);
    cmd.kill_on_drop(true);
    cmd
}

/// Probe PATH for `<name>.exe`, `<name>.cmd`, `<name>.bat` (cached per
/// process — PATH does not change under us).
#[cfg(windows)]
fn resolve_windows_executable(name: &str) -> String {
    use std::collections::HashMap;
    use std::sync::{Mutex, OnceLock};

    static CACHE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(hit) = cache.lock().unwrap().get(name) {
        return hit.clone();
    }

    let mut resolved = name.to_string();
    if !name.contains('\\') && !name.contains('/') {
        if let Some(paths) = std::env::var_os("PATH") {
            'outer: for dir in std::env::split_paths(&paths) {
                for ext in [".exe", ".cmd", ".bat"] {
                    let candidate = dir.join(format!("{name}{ext}"));
                    if candidate.is_file() {
                        resolved = candidate.to_string_lossy().into_owned();
                        break 'outer;
                    }
                }
            }
        }
    }
    cache.lock().unwrap().insert(name.to_string(), resolved.clone());
    resolved
}

fn cap(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut cut = limit;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...[truncated {} bytes]", &s[..cut], s.len() - cut)
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Run an allow-listed command without a shell. Output is captured \
         (50 KB stdout / 10 KB stderr) and execution is killed after the \
         configured timeout. Shell metacharacters are rejected — run one \
         plain command per call."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line to run" },
                "cwd": { "type": "string", "description": "Working directory (defaults to the project root)" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Builder]
    }

    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'command'"))?;
        let cwd = match args.get("cwd").and_then(|v| v.as_str()) {
            Some(raw) => Some(validate_path(raw, ctx, "execute_command").await?),
            None => None,
        };
        run_command_line(command, cwd, ctx).await
    }
}
