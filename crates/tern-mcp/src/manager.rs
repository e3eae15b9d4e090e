// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide registry of MCP clients.
//!
//! Tools from every connected server are flattened into one catalog under
//! `mcp_<server>_<tool>` names; calls reverse the rewrite to find the
//! owning client.  The registry lives for the whole process, independent
//! of agent runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use tern_config::McpServerConfig;
use tern_model::UniversalToolDefinition;
use tern_tools::{McpDispatch, MCP_TOOL_PREFIX};

use crate::client::McpClient;

/// Capacity guard for concurrently connected servers.
pub const MAX_CLIENTS: usize = 12;

#[derive(Default)]
pub struct McpManager {
    clients: tokio::sync::Mutex<HashMap<String, Arc<McpClient>>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a server.  An existing client under the same id is
    /// disconnected first; the capacity cap applies to new ids.
    pub async fn connect(&self, config: &McpServerConfig) -> anyhow::Result<()> {
        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.remove(&config.id) {
            warn!(server = %config.id, "replacing existing MCP client");
            existing.disconnect().await;
        }
        if clients.len() >= MAX_CLIENTS {
            anyhow::bail!("MCP client capacity reached ({MAX_CLIENTS})");
        }
        let client = McpClient::connect(config).await?;
        clients.insert(config.id.clone(), client);
        Ok(())
    }

    pub async fn disconnect(&self, server_id: &str) {
        if let Some(client) = self.clients.lock().await.remove(server_id) {
            client.disconnect().await;
        }
    }

    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = self.clients.lock().await.drain().collect();
        for (_, client) in drained {
            client.disconnect().await;
        }
    }

    pub async fn connected_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `mcp_<server_id_with_dashes_replaced>_<tool>`.
    fn prefixed_name(server_id: &str, tool: &str) -> String {
        format!("{MCP_TOOL_PREFIX}{}_{tool}", server_id.replace('-', "_"))
    }

    /// Find the client and original tool name for a prefixed name.
    async fn resolve(&self, prefixed: &str) -> anyhow::Result<(Arc<McpClient>, String)> {
        let rest = prefixed
            .strip_prefix(MCP_TOOL_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("not an MCP tool name: {prefixed}"))?;
        let clients = self.clients.lock().await;
        for (id, client) in clients.iter() {
            let key = format!("{}_", id.replace('-', "_"));
            if let Some(tool) = rest.strip_prefix(&key) {
                return Ok((Arc::clone(client), tool.to_string()));
            }
        }
        anyhow::bail!("no connected MCP server owns tool {prefixed}")
    }
}

#[async_trait]
impl McpDispatch for McpManager {
    async fn call_tool(&self, prefixed_name: &str, args: &Value) -> anyhow::Result<String> {
        let (client, tool) = self.resolve(prefixed_name).await?;
        debug!(server = %client.server_id(), tool = %tool, "dispatching MCP tool call");
        client.call_tool(&tool, args).await
    }

    async fn all_tools(&self) -> Vec<UniversalToolDefinition> {
        let clients = self.clients.lock().await;
        let mut defs = Vec::new();
        for (id, client) in clients.iter() {
            if !client.is_connected() {
                continue;
            }
            for tool in client.tools() {
                defs.push(UniversalToolDefinition {
                    name: Self::prefixed_name(id, &tool.name),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                });
            }
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
