// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Regex search over a directory tree.
//!
//! First choice is an out-of-process ripgrep run with fixed flags; when the
//! binary is missing or misbehaves, a process-wide latch flips and every
//! later search uses the in-process fallback (walkdir + regex with bounded
//! reader concurrency).

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::executor::{ExecutionContext, Tool};
use crate::security::path::validate_path;

const MAX_RESULTS: usize = 100;
const MAX_DEPTH: usize = 8;
const MAX_FILE_BYTES: u64 = 500 * 1024;
const MAX_PATTERN_LEN: usize = 500;
const MATCH_TEXT_CAP: usize = 200;
const READ_CONCURRENCY: usize = 12;
const RG_TIMEOUT: Duration = Duration::from_secs(30);

const IGNORE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".venv",
    "venv",
    "__pycache__",
    "vendor",
    ".idea",
    ".vscode",
];

/// Process-wide ripgrep availability: 0 = unknown, 1 = yes, 2 = no.
static RG_AVAILABLE: AtomicU8 = AtomicU8::new(0);

fn rg_known_unavailable() -> bool {
    RG_AVAILABLE.load(Ordering::Relaxed) == 2
}

fn latch_rg(available: bool) {
    RG_AVAILABLE.store(if available { 1 } else { 2 }, Ordering::Relaxed);
}

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents under a directory with a case-insensitive \
         regex. Returns up to 100 matches as path:line: text. Optional \
         'include' glob filters file names (e.g. '*.rs'). Large files, \
         hidden build directories, and node_modules are skipped."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to search" },
                "pattern": { "type": "string", "description": "Regular expression to match" },
                "include": { "type": "string", "description": "Optional file-name glob, e.g. '*.ts'" }
            },
            "required": ["path", "pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String> {
        let raw = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'path'"))?;
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing required parameter 'pattern'"))?;
        let include = args.get("include").and_then(|v| v.as_str());

        if pattern.is_empty() {
            anyhow::bail!("pattern must not be empty");
        }
        if pattern.len() > MAX_PATTERN_LEN {
            anyhow::bail!("pattern exceeds {MAX_PATTERN_LEN} characters");
        }
        let root = validate_path(raw, ctx, "search_files").await?;
        debug!(path = %root.display(), pattern, "search_files tool");

        if ctx.tools_config.prefer_ripgrep && !rg_known_unavailable() {
            match run_ripgrep(pattern, &root, include).await {
                Ok(output) => {
                    latch_rg(true);
                    return Ok(output);
                }
                Err(e) => {
                    warn!(error = %e, "ripgrep unavailable; using in-process search");
                    latch_rg(false);
                }
            }
        }

        fallback_search(pattern, &root, include).await
    }
}

/// Out-of-process ripgrep with fixed flags.  Exit code 1 means "no matches";
/// a missing binary or any unexpected exit is an error so the caller can
/// latch the fallback.
async fn run_ripgrep(
    pattern: &str,
    root: &std::path::Path,
    include: Option<&str>,
) -> anyhow::Result<String> {
    let mut cmd = tokio::process::Command::new("rg");
    cmd.arg("--color").arg("never")
        .arg("--no-heading")
        .arg("--line-number")
        .arg("--ignore-case")
        .arg("--max-count").arg(MAX_RESULTS.to_string())
        .arg("--max-filesize").arg(MAX_FILE_BYTES.to_string())
        .arg("--max-depth").arg(MAX_DEPTH.to_string());
    for dir in IGNORE_DIRS {
        cmd.arg("--glob").arg(format!("!{dir}"));
    }
    if let Some(glob) = include {
        cmd.arg("--glob").arg(glob);
    }
    cmd.arg("--").arg(pattern).arg(root);
    cmd.stdin(std::process::Stdio::null());

    let output = tokio::time::timeout(RG_TIMEOUT, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("ripgrep timed out"))?
        .map_err(|e| anyhow::anyhow!("ripgrep spawn failed: {e}"))?;

    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let mut lines: Vec<String> = Vec::new();
            for line in stdout.lines().take(MAX_RESULTS) {
                lines.push(truncate_match_line(line));
            }
            Ok(render_results(lines))
        }
        Some(1) => Ok("No matches found.".to_string()),
        other => anyhow::bail!("ripgrep exited with {other:?}"),
    }
}

/// Cap the text portion of a `path:line:text` result at [`MATCH_TEXT_CAP`].
fn truncate_match_line(line: &str) -> String {
    // Split after the second ':' so Windows drive letters in paths survive.
    let mut colons = 0;
    for (i, c) in line.char_indices() {
        if c == ':' {
            colons += 1;
            if colons == 2 {
                let (head, text) = line.split_at(i + 1);
                let mut cut = text.to_string();
                if cut.len() > MATCH_TEXT_CAP {
                    let mut end = MATCH_TEXT_CAP;
                    while !cut.is_char_boundary(end) {
                        end -= 1;
                    }
                    cut.truncate(end);
                    cut.push('…');
                }
                return format!("{head}{cut}");
            }
        }
    }
    line.to_string()
}

fn render_results(lines: Vec<String>) -> String {
    if lines.is_empty() {
        return "No matches found.".to_string();
    }
    let mut out = format!("{} match(es):\n", lines.len());
    out.push_str(&lines.join("\n"));
    out
}

enum Matcher {
    Regex(regex::Regex),
    /// Lower-cased literal; used when the pattern does not compile.
    Literal(String),
}

impl Matcher {
    fn build(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => Matcher::Regex(re),
            Err(_) => Matcher::Literal(pattern.to_lowercase()),
        }
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(line),
            Matcher::Literal(needle) => line.to_lowercase().contains(needle),
        }
    }
}

/// In-process search: walk the tree, then scan candidate files with a
/// bounded number of concurrent readers, stopping at [`MAX_RESULTS`] hits.
async fn fallback_search(
    pattern: &str,
    root: &std::path::Path,
    include: Option<&str>,
) -> anyhow::Result<String> {
    let include_re = include.and_then(glob_to_regex);
    let root_buf = root.to_path_buf();

    let files: Vec<std::path::PathBuf> = tokio::task::spawn_blocking(move || {
        WalkDir::new(&root_buf)
            .max_depth(MAX_DEPTH)
            .into_iter()
            .filter_entry(|e| {
                // The search root itself is always entered, whatever its name.
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir()
                    && (IGNORE_DIRS.contains(&name.as_ref()) || name.starts_with('.')))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.metadata().map(|m| m.len() <= MAX_FILE_BYTES).unwrap_or(false))
            .map(|e| e.into_path())
            .collect()
    })
    .await?;

    let matcher = std::sync::Arc::new(Matcher::build(pattern));
    let mut results: Vec<String> = Vec::new();

    let mut scans = futures::stream::iter(files.into_iter().filter(move |path| {
        match &include_re {
            Some(re) => path
                .file_name()
                .map(|n| re.is_match(&n.to_string_lossy()))
                .unwrap_or(false),
            None => true,
        }
    }))
    .map(|path| {
        let matcher = std::sync::Arc::clone(&matcher);
        async move {
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                return Vec::new();
            };
            let mut hits = Vec::new();
            for (lineno, line) in content.lines().enumerate() {
                if matcher.is_match(line) {
                    hits.push(truncate_match_line(&format!(
                        "{}:{}:{}",
                        path.display(),
                        lineno + 1,
                        line
                    )));
                }
            }
            hits
        }
    })
    .buffered(READ_CONCURRENCY);

    while let Some(hits) = scans.next().await {
        for hit in hits {
            results.push(hit);
            if results.len() >= MAX_RESULTS {
                return Ok(render_results(results));
            }
        }
    }
    Ok(render_results(results))
}

/// `*` and `?` glob to anchored regex; anything else is literal.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_for(dir: &tempfile::TempDir) -> ExecutionContext {
        ExecutionContext {
            project_root: Some(dir.path().to_path_buf()),
            // Exercise the in-process path deterministically.
            tools_config: tern_config::ToolsConfig { prefer_ripgrep: false, ..Default::default() },
            ..ExecutionContext::default()
        }
    }

    async fn search(dir: &tempfile::TempDir, pattern: &str, include: Option<&str>) -> String {
        let mut args = json!({"path": dir.path().to_str().unwrap(), "pattern": pattern});
        if let Some(g) = include {
            args["include"] = json!(g);
        }
        SearchFilesTool.execute(&args, &ctx_for(dir)).await.unwrap()
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nfn helper() {}\n").unwrap();
        let out = search(&dir, "fn \\w+", None).await;
        assert!(out.contains("a.rs:1:"));
        assert!(out.contains("a.rs:2:"));
    }

    #[tokio::test]
    async fn include_glob_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "needle").unwrap();
        std::fs::write(dir.path().join("b.txt"), "needle").unwrap();
        let out = search(&dir, "needle", Some("*.rs")).await;
        assert!(out.contains("a.rs"));
        assert!(!out.contains("b.txt"));
    }

    #[tokio::test]
    async fn invalid_regex_downgrades_to_literal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "price is $(42) total").unwrap();
        let out = search(&dir, "$(42)", None).await;
        assert!(out.contains("a.txt:1:"));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Hello World").unwrap();
        let out = search(&dir, "hello", None).await;
        assert!(out.contains("a.txt"));
    }

    #[tokio::test]
    async fn ignored_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/x.js"), "needle").unwrap();
        std::fs::write(dir.path().join("src.js"), "needle").unwrap();
        let out = search(&dir, "needle", None).await;
        assert!(out.contains("src.js"));
        assert!(!out.contains("node_modules"));
    }

    #[tokio::test]
    async fn oversized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let big = "needle ".repeat(100_000); // ~700 KB
        std::fs::write(dir.path().join("big.txt"), big).unwrap();
        std::fs::write(dir.path().join("small.txt"), "needle").unwrap();
        let out = search(&dir, "needle", None).await;
        assert!(out.contains("small.txt"));
        assert!(!out.contains("big.txt"));
    }

    #[tokio::test]
    async fn results_cap_at_one_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let many = "hit\n".repeat(250);
        std::fs::write(dir.path().join("many.txt"), many).unwrap();
        let out = search(&dir, "hit", None).await;
        assert!(out.starts_with("100 match(es):"));
    }

    #[tokio::test]
    async fn long_pattern_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = json!({
            "path": dir.path().to_str().unwrap(),
            "pattern": "x".repeat(MAX_PATTERN_LEN + 1)
        });
        assert!(SearchFilesTool.execute(&args, &ctx_for(&dir)).await.is_err());
    }

    #[tokio::test]
    async fn no_matches_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing here").unwrap();
        assert_eq!(search(&dir, "absent_token_xyz", None).await, "No matches found.");
    }

    #[test]
    fn match_line_text_is_capped() {
        let long = format!("/p/file.txt:7:{}", "y".repeat(500));
        let cut = truncate_match_line(&long);
        assert!(cut.len() < long.len());
        assert!(cut.starts_with("/p/file.txt:7:"));
        assert!(cut.ends_with('…'));
    }
}
