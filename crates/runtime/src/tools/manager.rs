//! Tool server startup orchestration.

use super::{ToolDescriptor, ToolError, ToolHost, ToolServer};
use crate::config::ToolConfig;
use crate::schema::normalize_schema;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

/// Owns the live tool-server set.
///
/// Servers are started in configuration order; ones that fail to come up are
/// excluded from the live set and not retried. The live set is immutable
/// after startup and torn down as a unit at shutdown.
pub struct ToolServerManager {
    servers: Vec<ToolServer>,
}

impl ToolServerManager {
    /// Start every enabled tool server and repair its advertised schemas.
    ///
    /// Disabled entries are never started. A server that fails to connect is
    /// logged with its name and skipped; zero live servers is a valid
    /// outcome and the agent runs tool-free.
    pub async fn start(configs: &[ToolConfig]) -> Self {
        Self::start_via(configs, ToolServer::connect).await
    }

    async fn start_via(
        configs: &[ToolConfig],
        connect: impl AsyncFn(&ToolConfig) -> Result<ToolServer, ToolError>,
    ) -> Self {
        let mut servers = Vec::new();

        for config in configs.iter().filter(|c| c.enabled) {
            match connect(config).await {
                Ok(mut server) => {
                    let fixed: usize = server
                        .descriptors_mut()
                        .iter_mut()
                        .map(|tool| normalize_schema(&mut tool.input_schema))
                        .sum();
                    info!(
                        server = %server.name(),
                        tools = server.descriptors().len(),
                        fixed,
                        "connected tool server"
                    );
                    servers.push(server);
                }
                Err(e) => {
                    warn!(server = %config.name, error = %e, "failed to start tool server");
                }
            }
        }

        Self { servers }
    }

    /// Create a manager with no tool servers.
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
        }
    }

    /// The live servers, in configuration order.
    pub fn servers(&self) -> &[ToolServer] {
        &self.servers
    }

    /// Shut down every live server, regardless of individual outcomes.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.cleanup().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn with_servers(servers: Vec<ToolServer>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ToolHost for ToolServerManager {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.servers
            .iter()
            .flat_map(|s| s.descriptors().iter().cloned())
            .collect()
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        // First server in configured order wins on duplicate names.
        let server = self
            .servers
            .iter()
            .find(|s| s.has_tool(name))
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        server.call_tool(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn tool_config(name: &str, command: &str, enabled: bool) -> ToolConfig {
        ToolConfig {
            name: name.to_string(),
            enabled,
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn disabled_servers_are_never_started() {
        let configs = vec![tool_config("off", "/nonexistent/mcp-off", false)];
        let manager = ToolServerManager::start(&configs).await;
        assert!(manager.servers().is_empty());
    }

    #[tokio::test]
    async fn failed_spawns_are_excluded_not_fatal() {
        let configs = vec![
            tool_config("a", "/nonexistent/mcp-a", true),
            tool_config("b", "/nonexistent/mcp-b", true),
        ];
        let manager = ToolServerManager::start(&configs).await;
        assert!(manager.servers().is_empty());
    }

    #[tokio::test]
    async fn failed_provider_mid_list_keeps_survivor_order() {
        let configs = vec![
            tool_config("first", "mcp-first", true),
            tool_config("second", "mcp-second", true),
            tool_config("third", "mcp-third", true),
        ];

        let manager = ToolServerManager::start_via(&configs, async |config: &ToolConfig| {
            if config.name == "second" {
                return Err(ToolError::Unavailable("handshake failed".to_string()));
            }
            Ok(ToolServer::detached(
                config.name.as_str(),
                vec![descriptor(&format!("{}-tool", config.name))],
            ))
        })
        .await;

        let names: Vec<_> = manager.servers().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["first", "third"]);
        let tools: Vec<_> = manager.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(tools, vec!["first-tool", "third-tool"]);
    }

    #[tokio::test]
    async fn empty_manager_has_no_descriptors() {
        let manager = ToolServerManager::empty();
        assert!(manager.descriptors().is_empty());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn descriptors_preserve_server_order() {
        let manager = ToolServerManager::with_servers(vec![
            ToolServer::detached("first", vec![descriptor("alpha"), descriptor("beta")]),
            ToolServer::detached("second", vec![descriptor("gamma")]),
        ]);

        let names: Vec<_> = manager.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_not_found() {
        let manager = ToolServerManager::with_servers(vec![ToolServer::detached(
            "first",
            vec![descriptor("alpha")],
        )]);

        let result = manager.invoke("missing", json!({})).await;
        assert!(matches!(result, Err(ToolError::NotFound(_))));
    }

    #[tokio::test]
    async fn invoke_routes_to_first_matching_server() {
        // Both servers advertise "alpha"; the first configured one wins.
        let manager = ToolServerManager::with_servers(vec![
            ToolServer::detached("first", vec![descriptor("alpha")]),
            ToolServer::detached("second", vec![descriptor("alpha")]),
        ]);

        // Detached servers have no live service, so routing is observable
        // through the unavailable error naming the chosen server.
        let result = manager.invoke("alpha", json!({})).await;
        match result {
            Err(ToolError::Unavailable(msg)) => assert!(msg.contains("first")),
            other => panic!("expected unavailable error, got {other:?}"),
        }
    }
}
