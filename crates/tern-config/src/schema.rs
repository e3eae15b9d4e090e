// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for opt-out flags.
fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    50
}

fn default_command_timeout_secs() -> u64 {
    60
}

/// The three wire-protocol variants the adapter layer normalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFormat {
    /// `POST <base>/chat/completions` — OpenAI chat-completions family.
    ChatCompletions,
    /// `POST <base>/responses` — OpenAI responses family.
    Responses,
    /// `POST <base>/messages` — Anthropic messages family.
    AnthropicMessages,
}

/// Which tool catalog an agent run is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Full catalog: filesystem, command execution, web.
    #[default]
    Builder,
    /// Read-only tools only.
    Planner,
    /// Mid-sized subset for conversational use.
    Chat,
}

/// How edits to files are approved during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditApprovalMode {
    /// Never prompt; all mutating tool calls run.
    AllowAll,
    /// Approve once per session, then allow.
    SessionOnly,
    /// Prompt for every mutating tool call.
    #[default]
    Ask,
}

/// A configured upstream provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable identifier referenced by model configs and logs.
    pub id: String,
    /// Human-readable display name.
    #[serde(default)]
    pub name: String,
    /// API base that ends before the endpoint path, e.g.
    /// `https://api.openai.com/v1`.
    pub base_url: String,
    /// Explicit API key; prefer `api_key_env` in version-controlled files.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Wire format used when neither the model config nor the seeded
    /// model-format table says otherwise.
    pub default_format: EndpointFormat,
    /// Additional HTTP headers sent on every request to this provider.
    ///
    /// Values must be JSON strings; anything else is rejected at request
    /// build time rather than silently coerced.
    #[serde(default)]
    pub extra_headers: HashMap<String, Value>,
}

impl ProviderConfig {
    /// Resolve the API key: explicit value wins, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            if !k.is_empty() {
                return Some(k.clone());
            }
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

/// Per-model overrides layered on top of a [`ProviderConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier as selected by the user, e.g. `claude-sonnet-4-5`.
    pub id: String,
    /// Display name; defaults to `id`.
    #[serde(default)]
    pub name: String,
    /// Wire format override.  Takes precedence over the seeded model-format
    /// table and the provider default.
    #[serde(default)]
    pub endpoint_format: Option<EndpointFormat>,
    /// Base URL override for this model only.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Identifier forwarded to the provider API when it differs from `id`.
    #[serde(default)]
    pub api_model_id: Option<String>,
    /// Extra headers merged after the provider's (model wins on conflict).
    #[serde(default)]
    pub extra_headers: HashMap<String, Value>,
    /// Requested output-token cap; recomputed against the context window at
    /// request build time.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Context window in tokens.  When set it is installed as the
    /// conversation eviction threshold.
    #[serde(default)]
    pub context_window: Option<u32>,
    /// `Some(false)` disables sending tool definitions to this model.
    #[serde(default)]
    pub supports_tools: Option<bool>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            endpoint_format: None,
            base_url: None,
            api_model_id: None,
            extra_headers: HashMap::new(),
            max_output_tokens: None,
            context_window: None,
            supports_tools: None,
        }
    }

    /// The model id to place in the wire body.
    pub fn wire_id(&self) -> &str {
        self.api_model_id.as_deref().unwrap_or(&self.id)
    }
}

/// Agent-loop defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration bound for one run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Approval policy for mutating file operations.
    #[serde(default)]
    pub edit_approval: EditApprovalMode,
    /// Custom system prompt override.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            edit_approval: EditApprovalMode::default(),
            system_prompt: None,
        }
    }
}

/// Tool-executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Executable basenames `execute_command` may spawn.  Extends (never
    /// replaces) the built-in allow-list.
    #[serde(default)]
    pub extra_allowed_commands: Vec<String>,
    /// Wall timeout for one spawned command.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Allow `fetch_url` to reach hosts outside the provider allow-list.
    #[serde(default)]
    pub allow_any_fetch_host: bool,
    /// Use ripgrep for `search_files` when available.
    #[serde(default = "default_true")]
    pub prefer_ripgrep: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            extra_allowed_commands: Vec::new(),
            command_timeout_secs: default_command_timeout_secs(),
            allow_any_fetch_host: false,
            prefer_ripgrep: true,
        }
    }
}

/// One configured MCP server: how to spawn it and what to call it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Registry key; dashes are folded to underscores in tool prefixes.
    pub id: String,
    /// Executable to spawn (validated against the command allow-list).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment merged over the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named provider configurations, referenced by model configs.
    ///
    /// ```yaml
    /// providers:
    ///   local_ollama:
    ///     id: ollama
    ///     base_url: http://localhost:11434/v1
    ///     default_format: chat_completions
    ///   anthropic:
    ///     id: anthropic
    ///     base_url: https://api.anthropic.com/v1
    ///     api_key_env: ANTHROPIC_API_KEY
    ///     default_format: anthropic_messages
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_defaults_cap_iterations_at_fifty() {
        assert_eq!(AgentConfig::default().max_iterations, 50);
    }

    #[test]
    fn edit_approval_defaults_to_ask() {
        assert_eq!(AgentConfig::default().edit_approval, EditApprovalMode::Ask);
    }

    #[test]
    fn endpoint_format_round_trips_snake_case() {
        let json = serde_json::to_string(&EndpointFormat::AnthropicMessages).unwrap();
        assert_eq!(json, "\"anthropic_messages\"");
        let back: EndpointFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EndpointFormat::AnthropicMessages);
    }

    #[test]
    fn model_config_wire_id_prefers_api_model_id() {
        let mut m = ModelConfig::new("gpt-5.2");
        assert_eq!(m.wire_id(), "gpt-5.2");
        m.api_model_id = Some("gpt-5.2-2026-01-15".into());
        assert_eq!(m.wire_id(), "gpt-5.2-2026-01-15");
    }

    #[test]
    fn provider_resolves_explicit_key_over_env() {
        let p = ProviderConfig {
            id: "x".into(),
            name: String::new(),
            base_url: "https://api.example.com/v1".into(),
            api_key: Some("sk-explicit".into()),
            api_key_env: Some("TERN_TEST_KEY_UNSET".into()),
            default_format: EndpointFormat::ChatCompletions,
            extra_headers: HashMap::new(),
        };
        assert_eq!(p.resolve_api_key().as_deref(), Some("sk-explicit"));
    }

    #[test]
    fn provider_empty_explicit_key_falls_through() {
        let p = ProviderConfig {
            id: "x".into(),
            name: String::new(),
            base_url: "https://api.example.com/v1".into(),
            api_key: Some(String::new()),
            api_key_env: None,
            default_format: EndpointFormat::ChatCompletions,
            extra_headers: HashMap::new(),
        };
        assert_eq!(p.resolve_api_key(), None);
    }

    #[test]
    fn config_parses_minimal_yaml() {
        let yaml = r#"
agent:
  max_iterations: 8
providers:
  anthropic:
    id: anthropic
    base_url: https://api.anthropic.com/v1
    default_format: anthropic_messages
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.agent.max_iterations, 8);
        assert_eq!(
            cfg.providers["anthropic"].default_format,
            EndpointFormat::AnthropicMessages
        );
        assert_eq!(cfg.tools.command_timeout_secs, 60);
    }
}
