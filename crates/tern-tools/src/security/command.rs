// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Command-line validation for `execute_command` and subprocess spawns.
//!
//! No shell is ever involved: commands are rejected on any shell
//! metacharacter, tokenized with a quote-aware splitter, checked against an
//! executable allow-list, and spawned directly with captured output.

/// Characters that would require (or simulate) shell interpretation.
const METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\n', '\r',
];

/// Executable basenames that may be spawned: package managers, language
/// runtimes, common POSIX utilities, container tools, and test runners.
const ALLOWED_COMMANDS: &[&str] = &[
    // package managers
    "npm", "npx", "pnpm", "yarn", "bun", "pip", "pip3", "poetry", "uv", "gem", "bundle",
    "composer",
    // language runtimes / toolchains
    "node", "deno", "python", "python3", "ruby", "perl", "php", "cargo", "rustc", "rustup",
    "go", "java", "javac", "mvn", "gradle", "dotnet", "swift", "tsc",
    // version control
    "git",
    // POSIX utilities
    "ls", "cat", "head", "tail", "wc", "sort", "uniq", "cut", "tr", "echo", "pwd", "which",
    "env", "date", "diff", "du", "df", "file", "stat", "find", "grep", "rg", "sed", "awk",
    "mkdir", "cp", "mv", "touch", "basename", "dirname", "tar", "gzip", "gunzip", "zip",
    "unzip", "make", "cmake", "curl", "sha256sum", "md5sum",
    // container tools
    "docker", "podman", "kubectl", "helm", "docker-compose",
    // test runners / linters
    "jest", "vitest", "mocha", "pytest", "tox", "ctest", "eslint", "prettier", "ruff",
    "black", "mypy", "flake8", "clippy-driver", "rspec", "phpunit",
];

/// Eval-style flags per runtime interpreter: these turn an allow-listed
/// interpreter into an arbitrary-code gateway and are always blocked.
const BLOCKED_INTERPRETER_FLAGS: &[(&str, &[&str])] = &[
    ("node", &["-e", "--eval", "--input-type", "-p", "--print"]),
    ("python", &["-c", "--command"]),
    ("python3", &["-c", "--command"]),
    ("ruby", &["-e"]),
    ("perl", &["-e", "-E"]),
    ("php", &["-r"]),
    ("deno", &["eval"]),
];

/// Validate a command line and split it into argv tokens.
pub fn validate_command(
    command: &str,
    extra_allowed: &[String],
) -> anyhow::Result<Vec<String>> {
    if command.trim().is_empty() {
        anyhow::bail!("command must be a non-empty string");
    }
    if let Some(c) = command.chars().find(|c| METACHARACTERS.contains(c)) {
        anyhow::bail!("shell metacharacter {c:?} is not allowed");
    }
    #[cfg(windows)]
    {
        if command.contains('%') {
            anyhow::bail!("environment-variable expansion is not allowed");
        }
        if command.contains('^') {
            anyhow::bail!("caret escapes are not allowed");
        }
    }

    let tokens = tokenize(command)?;
    let program = tokens.first().ok_or_else(|| anyhow::anyhow!("empty command"))?;
    let base = executable_basename(program);

    let allowed = ALLOWED_COMMANDS.contains(&base.as_str())
        || extra_allowed.iter().any(|c| c == &base);
    if !allowed {
        anyhow::bail!("command not in allow-list: {base}");
    }

    for (interpreter, flags) in BLOCKED_INTERPRETER_FLAGS {
        if base == *interpreter {
            for arg in &tokens[1..] {
                if flags.contains(&arg.as_str()) {
                    anyhow::bail!("{base} {arg} is not allowed (inline code execution)");
                }
            }
        }
    }

    Ok(tokens)
}

/// Basename with any `.cmd`/`.bat`/`.exe`/`.sh` extension stripped,
/// lower-cased for comparison.
fn executable_basename(program: &str) -> String {
    let base = program
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(program)
        .to_lowercase();
    for ext in [".cmd", ".bat", ".exe", ".sh"] {
        if let Some(stripped) = base.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    base
}

/// Quote-aware tokenizer: single and double quotes group, spaces delimit.
/// Unterminated quotes are an error.
fn tokenize(command: &str) -> anyhow::Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut has_token = false;

    for c in command.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    has_token = true;
                }
                ' ' | '\t' => {
                    if has_token {
                        tokens.push(std::mem::take(&mut current));
                        has_token = false;
                    }
                }
                c => {
                    current.push(c);
                    has_token = true;
                }
            },
        }
    }
    if quote.is_some() {
        anyhow::bail!("unterminated quote in command");
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_rejected() {
        assert!(validate_command("", &[]).is_err());
        assert!(validate_command("   ", &[]).is_err());
    }

    #[test]
    fn metacharacters_rejected() {
        for cmd in [
            "ls; rm -rf /",
            "cat a | grep b",
            "echo `id`",
            "echo $(id)",
            "git diff > out.txt",
            "ls & whoami",
            "echo {a,b}",
            "echo [ab]",
            "git log\nrm x",
        ] {
            assert!(validate_command(cmd, &[]).is_err(), "{cmd:?} must be rejected");
        }
    }

    #[test]
    fn allow_listed_command_tokenizes() {
        let tokens = validate_command("git diff --stat", &[]).unwrap();
        assert_eq!(tokens, vec!["git", "diff", "--stat"]);
    }

    #[test]
    fn unknown_executable_rejected() {
        assert!(validate_command("nmap -p 22 host", &[]).is_err());
    }

    #[test]
    fn extra_allowed_extends_the_list() {
        assert!(validate_command("mytool --version", &[]).is_err());
        assert!(validate_command("mytool --version", &["mytool".to_string()]).is_ok());
    }

    #[test]
    fn quoted_arguments_stay_whole() {
        let tokens = validate_command(r#"git commit -m "fix: handle empty path""#, &[]).unwrap();
        assert_eq!(tokens[3], "fix: handle empty path");
    }

    #[test]
    fn single_quotes_group() {
        let tokens = validate_command("echo 'two words'", &[]).unwrap();
        assert_eq!(tokens, vec!["echo", "two words"]);
    }

    #[test]
    fn unterminated_quote_rejected() {
        assert!(validate_command("echo 'oops", &[]).is_err());
    }

    #[test]
    fn node_eval_flags_blocked() {
        for flag in ["-e", "--eval", "-p", "--print", "--input-type"] {
            assert!(
                validate_command(&format!("node {flag} code"), &[]).is_err(),
                "node {flag} must be blocked"
            );
        }
        assert!(validate_command("node script.js", &[]).is_ok());
    }

    #[test]
    fn python_inline_code_blocked() {
        assert!(validate_command("python -c print(1)", &[]).is_err());
        assert!(validate_command("python3 -c print(1)", &[]).is_err());
        assert!(validate_command("python3 -m pytest", &[]).is_ok());
    }

    #[test]
    fn ruby_and_deno_eval_blocked() {
        assert!(validate_command("ruby -e puts(1)", &[]).is_err());
        assert!(validate_command("deno eval console.log(1)", &[]).is_err());
        assert!(validate_command("deno run main.ts", &[]).is_ok());
    }

    #[test]
    fn basename_strips_path_and_extension() {
        assert_eq!(executable_basename("/usr/bin/git"), "git");
        assert_eq!(executable_basename("C:\\tools\\npm.cmd"), "npm");
        assert_eq!(executable_basename("cargo.exe"), "cargo");
        assert_eq!(executable_basename("run.sh"), "run");
    }

    #[test]
    fn path_qualified_allowed_command_passes() {
        assert!(validate_command("/usr/bin/git status", &[]).is_ok());
    }
}
