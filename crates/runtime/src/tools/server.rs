//! Tool server process management.

use super::{ToolDescriptor, ToolError};
use crate::config::ToolConfig;
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    service::{RoleClient, RunningService},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::Value;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Bounded wait for the subprocess handshake, so one hung server cannot
/// stall startup of the rest.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle to one running MCP tool server.
///
/// Each server is an independent failure domain: connect errors are reported
/// to the caller as values, never propagated as fatal process errors.
pub struct ToolServer {
    name: String,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    tools: Vec<ToolDescriptor>,
}

impl ToolServer {
    /// Spawn the server subprocess, perform the handshake, and cache its
    /// advertised tools.
    ///
    /// The child inherits the relay's environment with the per-tool `env`
    /// entries layered on top.
    pub async fn connect(config: &ToolConfig) -> Result<Self, ToolError> {
        let transport = TokioChildProcess::new(Command::new(&config.command).configure(|cmd| {
            cmd.args(&config.args).envs(&config.env);
        }))
        .map_err(|e| ToolError::Unavailable(format!("spawn failed: {e}")))?;

        let service = tokio::time::timeout(CONNECT_TIMEOUT, ().serve(transport))
            .await
            .map_err(|_| ToolError::Unavailable("handshake timed out".to_string()))?
            .map_err(|e| ToolError::Unavailable(format!("handshake failed: {e}")))?;

        let response = service
            .list_tools(Default::default())
            .await
            .map_err(|e| ToolError::Execution(format!("tools/list failed: {e}")))?;

        let tools = response
            .tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: Value::Object(tool.input_schema.as_ref().clone()),
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            service: Mutex::new(Some(service)),
            tools,
        })
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cached tool descriptors.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Mutable access to the cached descriptors, for schema repair.
    pub fn descriptors_mut(&mut self) -> &mut [ToolDescriptor] {
        &mut self.tools
    }

    /// Whether this server advertises a tool with the given name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Call a tool on this server.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(ToolError::InvalidInput(format!(
                    "tool arguments must be an object, got {other}"
                )));
            }
        };

        let guard = self.service.lock().await;
        let service = guard
            .as_ref()
            .ok_or_else(|| ToolError::Unavailable(format!("server {} is shut down", self.name)))?;

        let result = service
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments,
                meta: None,
                task: None,
            })
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let content = serde_json::to_value(&result.content)
            .map_err(|e| ToolError::Execution(format!("serialize result: {e}")))?;

        if result.is_error.unwrap_or(false) {
            return Err(ToolError::Execution(content.to_string()));
        }

        Ok(content)
    }

    /// Terminate the subprocess and release its resources.
    ///
    /// Safe to call at any point and never errors; the child process is
    /// killed when the transport drops.
    pub async fn cleanup(&self) {
        let service = self.service.lock().await.take();
        drop(service);
    }

    #[cfg(test)]
    pub(crate) fn detached(name: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            name: name.into(),
            service: Mutex::new(None),
            tools,
        }
    }
}
