//! Agent session management.

use crate::config::AgentConfig;
use crate::engine::{Engine, TurnRequest};
use crate::tools::ToolHost;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the conversation, as carried in chat requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One element of a streamed turn.
///
/// A turn yields zero or more `Delta`s followed by exactly one terminal
/// `Done` or `Error`. Deltas already yielded before an error stand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Delta(String),
    Done,
    Error(String),
}

/// The lazy, one-shot output sequence of a turn. Single consumer; dropping
/// it abandons the turn.
pub type TurnStream = ReceiverStream<TurnEvent>;

const EVENT_BUFFER: usize = 32;

/// An executable agent: instructions, model, and the live tool set.
///
/// The tool set is read-only from the session's perspective and fixed for the
/// session's lifetime; changing providers means rebuilding the session.
/// Concurrent `run` calls are allowed and get independent streams.
pub struct AgentSession {
    name: String,
    instructions: String,
    model: String,
    tools: Arc<dyn ToolHost>,
    engine: Option<Arc<dyn Engine>>,
}

impl AgentSession {
    /// Bind a finalized tool set and an optional engine into a session.
    ///
    /// Without an engine the session still works and echoes messages back
    /// (degraded mode, not an error).
    pub fn new(
        config: &AgentConfig,
        tools: Arc<dyn ToolHost>,
        engine: Option<Arc<dyn Engine>>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            instructions: config.instructions.clone(),
            model: config.model.clone(),
            tools,
            engine,
        }
    }

    /// Get the agent name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a real execution engine is attached.
    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Drive one streamed turn.
    ///
    /// `history` order is preserved exactly and the new message is appended
    /// as the final user turn. An engine fault mid-turn still produces a
    /// terminal error event after whatever deltas were already yielded.
    pub fn run(&self, message: impl Into<String>, history: Vec<ConversationTurn>) -> TurnStream {
        let message = message.into();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let Some(engine) = self.engine.clone() else {
            tokio::spawn(async move {
                let _ = event_tx
                    .send(TurnEvent::Delta(format!("Echo: {message}")))
                    .await;
                let _ = event_tx.send(TurnEvent::Done).await;
            });
            return ReceiverStream::new(event_rx);
        };

        let mut messages = history;
        messages.push(ConversationTurn::user(message));
        let turn = TurnRequest {
            instructions: self.instructions.clone(),
            model: self.model.clone(),
            messages,
            tools: self.tools.clone(),
        };

        tokio::spawn(async move {
            let (delta_tx, mut delta_rx) = mpsc::channel(EVENT_BUFFER);
            let driver = tokio::spawn(async move { engine.stream_turn(turn, delta_tx).await });

            while let Some(delta) = delta_rx.recv().await {
                if event_tx.send(TurnEvent::Delta(delta)).await.is_err() {
                    // Consumer gone; stop draining and abandon the engine.
                    debug!("turn stream abandoned by consumer");
                    driver.abort();
                    return;
                }
            }

            let terminal = match driver.await {
                Ok(Ok(())) => TurnEvent::Done,
                Ok(Err(e)) => TurnEvent::Error(e.to_string()),
                Err(e) => TurnEvent::Error(format!("engine task failed: {e}")),
            };
            let _ = event_tx.send(terminal).await;
        });

        ReceiverStream::new(event_rx)
    }
}
