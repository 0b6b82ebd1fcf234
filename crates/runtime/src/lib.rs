//! Relay runtime — tool-server management and streamed agent execution.
//!
//! This crate provides the core of the agent-execution relay: starting and
//! supervising MCP tool servers, repairing their advertised schemas, and
//! driving streamed agent turns over them.
//!
//! # Overview
//!
//! The runtime is organized around these concepts:
//!
//! - **AgentConfig**: JSON configuration naming the agent, its model, and
//!   the tool servers to start.
//! - **ToolServerManager**: brings up the configured tool servers, excludes
//!   the ones that fail, and exposes the survivors as a read-only
//!   [`ToolHost`] capability.
//! - **AgentSession**: binds instructions, model, and the live tool set into
//!   an executable unit that streams one turn at a time.
//! - **Engine**: the opaque execution capability; absent credentials degrade
//!   the session to echo mode.
//!
//! # Example
//!
//! ```ignore
//! use runtime::{AgentConfig, AgentSession, AnthropicEngine, ToolServerManager, TurnEvent};
//! use std::sync::Arc;
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> runtime::Result<()> {
//! let config = AgentConfig::load("/home/user/agent_config.json")?;
//! let tools = Arc::new(ToolServerManager::start(&config.mcp_tools).await);
//! let engine = AnthropicEngine::from_env().map(|e| Arc::new(e) as _);
//!
//! let session = AgentSession::new(&config, tools.clone(), engine);
//! let mut stream = session.run("Hello!", Vec::new());
//! while let Some(event) = stream.next().await {
//!     if let TurnEvent::Delta(text) = event {
//!         print!("{text}");
//!     }
//! }
//! tools.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
mod error;
pub mod schema;
mod session;
pub mod tools;

pub use config::{AgentConfig, ToolConfig};
pub use engine::{AnthropicAuth, AnthropicEngine, Engine, TurnRequest};
pub use error::{Error, Result};
pub use schema::normalize_schema;
pub use session::{AgentSession, ConversationTurn, Role, TurnEvent, TurnStream};
pub use tools::{ToolDescriptor, ToolError, ToolHost, ToolServer, ToolServerManager};
