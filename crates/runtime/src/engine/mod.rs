//! Execution-engine boundary.
//!
//! The engine is an opaque capability from the session's point of view:
//! given instructions, a model identifier, and a tool set, it produces
//! incremental output for a conversation. The concrete implementation here
//! is the Anthropic streaming backend.

mod anthropic;

pub use anthropic::{AnthropicAuth, AnthropicEngine};

use crate::Result;
use crate::session::ConversationTurn;
use crate::tools::ToolHost;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One streamed turn handed to the engine.
pub struct TurnRequest {
    pub instructions: String,
    pub model: String,
    /// Ordered conversation, new user message last.
    pub messages: Vec<ConversationTurn>,
    pub tools: Arc<dyn ToolHost>,
}

/// Trait for execution engines.
///
/// Implementations push output fragments into `deltas` as they are generated
/// and return once the turn completes. A send failure means the consumer
/// abandoned the stream; implementations should stop generating and return.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn stream_turn(&self, turn: TurnRequest, deltas: mpsc::Sender<String>) -> Result<()>;
}
