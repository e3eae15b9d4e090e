// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Filesystem path containment.
//!
//! Every filesystem-touching tool runs its path(s) through this pipeline:
//! shape checks, UNC/extended-prefix rejection, absolute resolution,
//! system-prefix blacklist, and project-root containment with approval
//! escalation for anything outside the root.

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::executor::{ExecutionContext, PathApprovalRequest};

#[cfg(windows)]
const SYSTEM_PREFIXES: &[&str] = &[
    "c:\\windows",
    "c:\\program files",
    "c:\\program files (x86)",
    "c:\\programdata",
];

#[cfg(not(windows))]
const SYSTEM_PREFIXES: &[&str] =
    &["/usr", "/etc", "/bin", "/sbin", "/lib", "/lib64", "/sys", "/proc", "/dev"];

/// Validate and resolve a tool-supplied path.
///
/// `reason` names the operation (e.g. `"write_file"`) for approval prompts.
pub async fn validate_path(
    raw: &str,
    ctx: &ExecutionContext,
    reason: &str,
) -> anyhow::Result<PathBuf> {
    if raw.is_empty() {
        anyhow::bail!("path must be a non-empty string");
    }
    if raw.contains('\0') {
        anyhow::bail!("path contains a NUL byte");
    }
    reject_special_prefixes(raw)?;

    let resolved = resolve(raw, ctx.project_root.as_deref());
    reject_special_prefixes(&resolved.to_string_lossy())?;

    let lowered = resolved.to_string_lossy().to_lowercase();
    for prefix in SYSTEM_PREFIXES {
        if lowered == *prefix || lowered.starts_with(&format!("{prefix}{}", std::path::MAIN_SEPARATOR)) {
            anyhow::bail!("access to system path denied: {}", resolved.display());
        }
    }

    if let Some(root) = &ctx.project_root {
        if !is_within(&resolved, root) {
            let approved = match &ctx.path_approver {
                Some(approver) => {
                    let req = PathApprovalRequest {
                        approval_id: Uuid::new_v4().to_string(),
                        path: resolved.clone(),
                        reason: reason.to_string(),
                    };
                    approver.approve(&req).await
                }
                None => false,
            };
            if !approved {
                anyhow::bail!(
                    "access denied: {} is outside the project root",
                    resolved.display()
                );
            }
        }
    }

    Ok(resolved)
}

/// UNC (`\\`, `//`) and Windows extended-path (`\?\`) prefixes are rejected
/// on both the raw and resolved forms.
fn reject_special_prefixes(path: &str) -> anyhow::Result<()> {
    if path.starts_with("\\\\") || path.starts_with("//") {
        anyhow::bail!("UNC paths are not allowed");
    }
    if path.contains("\\?\\") {
        anyhow::bail!("extended-length path prefix is not allowed");
    }
    Ok(())
}

/// Resolve to an absolute path lexically (the target may not exist yet, so
/// `canonicalize` is not an option): relative paths are joined onto the
/// project root (or the process cwd), then `.` and `..` components are
/// folded.
fn resolve(raw: &str, root: Option<&Path>) -> PathBuf {
    let p = Path::new(raw);
    let absolute = if p.is_absolute() {
        p.to_path_buf()
    } else {
        let base = root
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        base.join(p)
    };

    let mut out = PathBuf::new();
    for comp in absolute.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// The root itself is within; otherwise the resolved path must extend the
/// root by a separator (so `/proj-evil` never matches root `/proj`).
fn is_within(path: &Path, root: &Path) -> bool {
    if path == root {
        return true;
    }
    path.starts_with(root)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionContext;

    fn ctx(root: &str) -> ExecutionContext {
        ExecutionContext {
            project_root: Some(PathBuf::from(root)),
            ..ExecutionContext::default()
        }
    }

    #[tokio::test]
    async fn empty_path_rejected() {
        assert!(validate_path("", &ctx("/proj"), "read_file").await.is_err());
    }

    #[tokio::test]
    async fn nul_byte_rejected() {
        assert!(validate_path("a\0b", &ctx("/proj"), "read_file").await.is_err());
    }

    #[tokio::test]
    async fn unc_prefix_rejected() {
        assert!(validate_path("//server/share", &ctx("/proj"), "read_file").await.is_err());
        assert!(validate_path("\\\\server\\share", &ctx("/proj"), "read_file").await.is_err());
    }

    #[tokio::test]
    async fn extended_prefix_rejected() {
        assert!(validate_path("C:\\\\?\\x", &ctx("/proj"), "read_file").await.is_err());
    }

    #[cfg(not(windows))]
    #[tokio::test]
    async fn system_paths_rejected() {
        for p in ["/etc/passwd", "/usr/bin/env", "/proc/self/maps", "/dev/null"] {
            assert!(
                validate_path(p, &ctx("/proj"), "read_file").await.is_err(),
                "{p} must be denied"
            );
        }
    }

    #[tokio::test]
    async fn path_inside_root_accepted() {
        let p = validate_path("/proj/src/main.rs", &ctx("/proj"), "read_file").await.unwrap();
        assert_eq!(p, PathBuf::from("/proj/src/main.rs"));
    }

    #[tokio::test]
    async fn exact_root_accepted() {
        let p = validate_path("/proj", &ctx("/proj"), "list_directory").await.unwrap();
        assert_eq!(p, PathBuf::from("/proj"));
    }

    #[tokio::test]
    async fn sibling_with_shared_prefix_requires_approval() {
        // One byte beyond the root boundary.
        assert!(validate_path("/proj-evil/x", &ctx("/proj"), "read_file").await.is_err());
    }

    #[tokio::test]
    async fn outside_root_without_approver_denied() {
        assert!(validate_path("/home/user/other", &ctx("/proj"), "read_file").await.is_err());
    }

    #[tokio::test]
    async fn dotdot_escape_is_resolved_then_denied() {
        assert!(validate_path("/proj/../secrets", &ctx("/proj"), "read_file").await.is_err());
    }

    #[tokio::test]
    async fn relative_path_joins_project_root() {
        let p = validate_path("src/lib.rs", &ctx("/proj"), "read_file").await.unwrap();
        assert_eq!(p, PathBuf::from("/proj/src/lib.rs"));
    }

    #[tokio::test]
    async fn approver_grants_out_of_root_access() {
        use crate::executor::PathApprover;
        struct Yes;
        #[async_trait::async_trait]
        impl PathApprover for Yes {
            async fn approve(&self, _req: &PathApprovalRequest) -> bool {
                true
            }
        }
        let mut c = ctx("/proj");
        c.path_approver = Some(std::sync::Arc::new(Yes));
        let p = validate_path("/tmp/out.txt", &c, "write_file").await.unwrap();
        assert_eq!(p, PathBuf::from("/tmp/out.txt"));
    }

    #[tokio::test]
    async fn no_project_root_means_no_containment() {
        let c = ExecutionContext::default();
        let p = validate_path("/tmp/anything.txt", &c, "read_file").await.unwrap();
        assert_eq!(p, PathBuf::from("/tmp/anything.txt"));
    }
}
