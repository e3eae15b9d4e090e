// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool dispatch.
//!
//! A dispatch table keyed by tool name.  Names beginning with `mcp_`
//! delegate to the external-subprocess layer through [`McpDispatch`]; all
//! others map to built-in implementations.  Every call is wrapped: tools
//! return `anyhow::Result<String>`, and the executor converts either side
//! into a [`ToolResult`] — it never propagates a failure to the loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use tern_config::{AgentMode, ToolsConfig};
use tern_model::{ToolCall, ToolResult, UniversalToolDefinition};

/// Tool names namespaced into the external-subprocess layer.
pub const MCP_TOOL_PREFIX: &str = "mcp_";

// ─── Approval seam ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PathApprovalRequest {
    pub approval_id: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Consulted when a validated path falls outside the project root.
/// Absence of an approver means denial.
#[async_trait]
pub trait PathApprover: Send + Sync {
    async fn approve(&self, req: &PathApprovalRequest) -> bool;
}

// ─── Peripheral-service seams ─────────────────────────────────────────────────

/// Backing service for the `web_search` tool.
#[async_trait]
pub trait WebSearchService: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<String>;
}

/// Backing service for the `lint_file` tool.
#[async_trait]
pub trait LintService: Send + Sync {
    async fn lint(&self, path: &std::path::Path) -> anyhow::Result<String>;
}

// ─── MCP seam ─────────────────────────────────────────────────────────────────

/// Narrow view of the MCP manager the executor dispatches through.
#[async_trait]
pub trait McpDispatch: Send + Sync {
    /// Call a namespaced (`mcp_<server>_<tool>`) tool and return its text.
    async fn call_tool(&self, prefixed_name: &str, args: &Value) -> anyhow::Result<String>;
    /// All connected servers' tools under their namespaced names.
    async fn all_tools(&self) -> Vec<UniversalToolDefinition>;
}

// ─── Execution context ────────────────────────────────────────────────────────

/// Per-run state handed to every tool invocation.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    /// Directory within which file operations run unguarded.
    pub project_root: Option<PathBuf>,
    pub path_approver: Option<Arc<dyn PathApprover>>,
    pub tools_config: ToolsConfig,
    pub web_search: Option<Arc<dyn WebSearchService>>,
    pub linter: Option<Arc<dyn LintService>>,
}

// ─── Tool trait and registry ──────────────────────────────────────────────────

/// Trait every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Agent modes in which this tool is offered.
    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Builder, AgentMode::Planner, AgentMode::Chat]
    }
    /// Execute.  Errors are converted to failure results by the executor.
    async fn execute(&self, args: &Value, ctx: &ExecutionContext) -> anyhow::Result<String>;
}

/// Process-wide registry of built-in tool definitions.  Registered at
/// startup; read-only during runs.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Registry pre-populated with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        crate::builtin::register_all(&mut reg);
        reg
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn definitions_for_mode(&self, mode: AgentMode) -> Vec<UniversalToolDefinition> {
        let mut defs: Vec<UniversalToolDefinition> = self
            .tools
            .values()
            .filter(|t| t.modes().contains(&mode))
            .map(|t| UniversalToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ─── Executor ─────────────────────────────────────────────────────────────────

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    mcp: Option<Arc<dyn McpDispatch>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, mcp: None }
    }

    pub fn with_mcp(mut self, mcp: Arc<dyn McpDispatch>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn mcp(&self) -> Option<&Arc<dyn McpDispatch>> {
        self.mcp.as_ref()
    }

    /// Execute one tool call.  Never fails: both thrown errors and unknown
    /// tools come back as `success = false` results with timing attached.
    pub async fn execute(&self, call: &ToolCall, ctx: &ExecutionContext) -> ToolResult {
        let started = Instant::now();
        debug!(tool = %call.name, id = %call.id, "executing tool");

        let outcome = if call.name.starts_with(MCP_TOOL_PREFIX) {
            match &self.mcp {
                Some(mcp) => mcp.call_tool(&call.name, &call.arguments).await,
                None => Err(anyhow::anyhow!("no MCP servers connected")),
            }
        } else {
            match self.registry.get(&call.name) {
                Some(tool) => tool.execute(&call.arguments, ctx).await,
                None => Err(anyhow::anyhow!("unknown tool: {}", call.name)),
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: true,
                output,
                duration_ms: Some(duration_ms),
            },
            Err(e) => ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: false,
                output: format!("Error executing {}: {e}", call.name),
                duration_ms: Some(duration_ms),
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
