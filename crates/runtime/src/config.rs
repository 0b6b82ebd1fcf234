//! Agent configuration loading from JSON.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Model used when the config file does not name one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Top-level agent configuration.
///
/// Loaded once at startup and immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Display name of the agent.
    #[serde(default = "default_name")]
    pub name: String,

    /// System instructions given to the model.
    #[serde(default = "default_instructions")]
    pub instructions: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Tool servers to start, in order.
    #[serde(default)]
    pub mcp_tools: Vec<ToolConfig>,
}

/// Configuration for one external tool server.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub name: String,

    /// Disabled entries are never started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Layered over the relay's own environment when spawning.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_name() -> String {
    "Assistant".to_string()
}

fn default_instructions() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            instructions: default_instructions(),
            model: default_model(),
            mcp_tools: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file falls back to the built-in default configuration.
    /// An unreadable or malformed file is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON string.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let config = AgentConfig::parse(
            r#"{
                "name": "Support Bot",
                "instructions": "Answer support questions.",
                "model": "claude-sonnet-4-20250514",
                "mcp_tools": [
                    {
                        "name": "crm",
                        "command": "mcp-crm",
                        "args": ["--readonly"],
                        "env": {"CRM_TOKEN": "t"}
                    },
                    {
                        "name": "scratch",
                        "enabled": false,
                        "command": "mcp-scratch"
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.name, "Support Bot");
        assert_eq!(config.mcp_tools.len(), 2);
        assert!(config.mcp_tools[0].enabled);
        assert_eq!(config.mcp_tools[0].args, vec!["--readonly"]);
        assert_eq!(config.mcp_tools[0].env["CRM_TOKEN"], "t");
        assert!(!config.mcp_tools[1].enabled);
        assert!(config.mcp_tools[1].args.is_empty());
    }

    #[test]
    fn parse_applies_field_defaults() {
        let config = AgentConfig::parse("{}").unwrap();
        assert_eq!(config.name, "Assistant");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.mcp_tools.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let result = AgentConfig::parse("{not json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load(dir.path().join("nope.json")).unwrap();
        assert_eq!(config.name, "Assistant");
        assert!(config.mcp_tools.is_empty());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_config.json");
        std::fs::write(&path, r#"{"name": "Echo", "model": "m"}"#).unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.name, "Echo");
        assert_eq!(config.model, "m");
    }
}
