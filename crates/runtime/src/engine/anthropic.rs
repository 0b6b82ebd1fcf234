//! Anthropic streaming engine.

use super::{Engine, TurnRequest};
use crate::session::Role;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Upper bound on tool round-trips within one turn.
const MAX_TOOL_STEPS: usize = 8;

// Claude Code OAuth constants
const CLAUDE_CODE_VERSION: &str = "2.1.2";
const OAUTH_BETA_HEADER: &str = "claude-code-20250219,oauth-2025-04-20,fine-grained-tool-streaming-2025-05-14,interleaved-thinking-2025-05-14";
const OAUTH_SYSTEM_PREFIX: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

/// Authentication mode for the Anthropic API.
///
/// Use `ApiKey` for standard API keys (`sk-ant-api01-...`).
/// Use `ClaudeCodeOauth` for OAuth tokens from Claude Code CLI (`sk-ant-oat-...`).
#[derive(Debug, Clone)]
pub enum AnthropicAuth {
    /// Standard API key authentication.
    ApiKey(String),
    /// Claude Code OAuth token authentication.
    ClaudeCodeOauth(String),
}

impl std::fmt::Display for AnthropicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "api_key"),
            Self::ClaudeCodeOauth(_) => write!(f, "claude_code_oauth"),
        }
    }
}

impl AnthropicAuth {
    /// Apply authentication headers to a request.
    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => req.header("x-api-key", key),
            Self::ClaudeCodeOauth(token) => req
                .header("anthropic-dangerous-direct-browser-access", "true")
                .header("Authorization", format!("Bearer {token}"))
                .header("anthropic-beta", OAUTH_BETA_HEADER)
                .header(
                    "user-agent",
                    format!("claude-cli/{CLAUDE_CODE_VERSION} (external, cli)"),
                )
                .header("x-app", "cli"),
        }
    }

    /// Build the system prompt in the appropriate format.
    fn build_system(&self, system: &str) -> SystemPrompt {
        match self {
            Self::ApiKey(_) => SystemPrompt::Simple(system.to_string()),
            Self::ClaudeCodeOauth(_) => {
                let blocks = vec![
                    SystemBlock {
                        block_type: "text",
                        text: OAUTH_SYSTEM_PREFIX.to_string(),
                        cache_control: CacheControl {
                            control_type: "ephemeral",
                        },
                    },
                    SystemBlock {
                        block_type: "text",
                        text: system.to_string(),
                        cache_control: CacheControl {
                            control_type: "ephemeral",
                        },
                    },
                ];
                SystemPrompt::Blocks(blocks)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a SystemPrompt>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ApiTool],
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SystemPrompt {
    Simple(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    cache_control: CacheControl,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: &'static str,
    /// Either a plain string or an array of content blocks.
    content: Value,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

fn role_to_api_str(role: Role) -> &'static str {
    match role {
        Role::User | Role::System => "user",
        Role::Assistant => "assistant",
    }
}

/// Anthropic API engine with streaming output and tool use.
pub struct AnthropicEngine {
    client: reqwest::Client,
    auth: AnthropicAuth,
    max_tokens: u32,
}

impl AnthropicEngine {
    pub fn new(auth: AnthropicAuth) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Set the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build an engine from `ANTHROPIC_API_KEY` or `ANTHROPIC_OAUTH_TOKEN`.
    ///
    /// Returns `None` when neither is set; the caller falls back to echo
    /// mode.
    pub fn from_env() -> Option<Self> {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Some(Self::new(AnthropicAuth::ApiKey(key)));
        }
        if let Ok(token) = std::env::var("ANTHROPIC_OAUTH_TOKEN") {
            return Some(Self::new(AnthropicAuth::ClaudeCodeOauth(token)));
        }
        None
    }

    async fn stream_once(
        &self,
        model: &str,
        messages: &[ApiMessage],
        system: &SystemPrompt,
        tools: &[ApiTool],
        deltas: &mpsc::Sender<String>,
    ) -> Result<StreamOutcome> {
        let request = ApiRequest {
            model,
            max_tokens: self.max_tokens,
            stream: true,
            messages,
            system: Some(system),
            tools,
        };

        let req = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .header("accept", "text/event-stream");
        let req = self.auth.apply_headers(req);

        let response = req
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let mut lines = SseLineBuffer::new();
        let mut state = StreamState::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::Network(format!("stream read failed: {e}")))?;
            for payload in lines.push(&chunk) {
                let event: Value = match serde_json::from_str(&payload) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(error = %e, "skipping unparseable stream event");
                        continue;
                    }
                };
                if let Some(delta) = state.apply(&event)? {
                    if deltas.send(delta).await.is_err() {
                        return Ok(state.into_outcome(true));
                    }
                }
            }
        }

        Ok(state.into_outcome(false))
    }

    async fn execute_tools(&self, turn: &TurnRequest, calls: &[ToolUse]) -> Vec<Value> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let block = match turn.tools.invoke(&call.name, call.input.clone()).await {
                Ok(output) => json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": output.to_string(),
                }),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool invocation failed");
                    json!({
                        "type": "tool_result",
                        "tool_use_id": call.id,
                        "content": e.to_string(),
                        "is_error": true,
                    })
                }
            };
            results.push(block);
        }
        results
    }
}

#[async_trait]
impl Engine for AnthropicEngine {
    async fn stream_turn(&self, turn: TurnRequest, deltas: mpsc::Sender<String>) -> Result<()> {
        let tools: Vec<ApiTool> = turn
            .tools
            .descriptors()
            .into_iter()
            .map(|t| ApiTool {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();
        let system = self.auth.build_system(&turn.instructions);

        // Instructions carry the system prompt; system turns in the history
        // are folded into the user position.
        let mut messages: Vec<ApiMessage> = turn
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: role_to_api_str(m.role),
                content: Value::String(m.content.clone()),
            })
            .collect();

        for _ in 0..MAX_TOOL_STEPS {
            let outcome = self
                .stream_once(&turn.model, &messages, &system, &tools, &deltas)
                .await?;

            if outcome.abandoned {
                return Ok(());
            }

            if outcome.stop_reason.as_deref() == Some("tool_use")
                && !outcome.tool_calls.is_empty()
            {
                messages.push(assistant_message(&outcome));
                let results = self.execute_tools(&turn, &outcome.tool_calls).await;
                messages.push(ApiMessage {
                    role: "user",
                    content: Value::Array(results),
                });
                continue;
            }

            return Ok(());
        }

        Err(Error::Engine(format!(
            "exceeded {MAX_TOOL_STEPS} tool steps in one turn"
        )))
    }
}

/// Rebuild the assistant message for the round that just streamed, so tool
/// results can be appended after it.
fn assistant_message(outcome: &StreamOutcome) -> ApiMessage {
    let mut blocks = Vec::new();
    if !outcome.text.is_empty() {
        blocks.push(json!({"type": "text", "text": outcome.text}));
    }
    for call in &outcome.tool_calls {
        blocks.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        }));
    }
    ApiMessage {
        role: "assistant",
        content: Value::Array(blocks),
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
struct ToolUse {
    id: String,
    name: String,
    input: Value,
}

enum Block {
    Text,
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Everything accumulated from one streamed response.
struct StreamOutcome {
    text: String,
    stop_reason: Option<String>,
    tool_calls: Vec<ToolUse>,
    abandoned: bool,
}

/// Incremental state over the provider's stream events.
struct StreamState {
    blocks: BTreeMap<u64, Block>,
    text: String,
    stop_reason: Option<String>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            text: String::new(),
            stop_reason: None,
        }
    }

    /// Fold one stream event in; returns the text delta to forward, if any.
    fn apply(&mut self, event: &Value) -> Result<Option<String>> {
        match event.get("type").and_then(Value::as_str) {
            Some("content_block_start") => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let block = &event["content_block"];
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    self.blocks.insert(
                        index,
                        Block::ToolUse {
                            id: string_field(block, "id"),
                            name: string_field(block, "name"),
                            input_json: String::new(),
                        },
                    );
                } else {
                    self.blocks.insert(index, Block::Text);
                }
                Ok(None)
            }
            Some("content_block_delta") => {
                let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                let delta = &event["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let Some(text) = delta.get("text").and_then(Value::as_str) else {
                            return Ok(None);
                        };
                        if text.is_empty() {
                            return Ok(None);
                        }
                        self.text.push_str(text);
                        Ok(Some(text.to_string()))
                    }
                    Some("input_json_delta") => {
                        if let Some(Block::ToolUse { input_json, .. }) =
                            self.blocks.get_mut(&index)
                        {
                            input_json.push_str(
                                delta
                                    .get("partial_json")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default(),
                            );
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event["delta"].get("stop_reason").and_then(Value::as_str) {
                    self.stop_reason = Some(reason.to_string());
                }
                Ok(None)
            }
            Some("error") => {
                let message = event["error"]
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown stream error");
                Err(Error::Api(message.to_string()))
            }
            _ => Ok(None),
        }
    }

    fn into_outcome(self, abandoned: bool) -> StreamOutcome {
        let tool_calls = self
            .blocks
            .into_values()
            .filter_map(|block| match block {
                Block::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = if input_json.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&input_json).unwrap_or_else(|_| json!({}))
                    };
                    Some(ToolUse { id, name, input })
                }
                Block::Text => None,
            })
            .collect();

        StreamOutcome {
            text: self.text,
            stop_reason: self.stop_reason,
            tool_calls,
            abandoned,
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Incremental `data:` line parser for an SSE byte stream.
///
/// Chunks may split lines, events, and even multi-byte characters
/// arbitrarily, so bytes are buffered raw and decoded only once a full line
/// has arrived. Completed `data` payloads are returned as they close.
struct SseLineBuffer {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseLineBuffer {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            data_lines: Vec::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.trim_start().to_string());
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_display() {
        let api = AnthropicAuth::ApiKey("test".into());
        let oauth = AnthropicAuth::ClaudeCodeOauth("test".into());
        assert_eq!(api.to_string(), "api_key");
        assert_eq!(oauth.to_string(), "claude_code_oauth");
    }

    #[test]
    fn sse_buffer_handles_split_chunks() {
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"event: content_block_delta\ndata: {\"a\"").is_empty());
        let events = buffer.push(b": 1}\n\n");
        assert_eq!(events, vec!["{\"a\": 1}"]);
    }

    #[test]
    fn sse_buffer_handles_crlf_and_multiple_events() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.push(b"data: one\r\n\r\ndata: two\n\n");
        assert_eq!(events, vec!["one", "two"]);
    }

    #[test]
    fn sse_buffer_reassembles_multibyte_chars_split_across_chunks() {
        // Network chunks can cut a UTF-8 sequence in half; the payload must
        // come back intact, not as replacement characters.
        let mut buffer = SseLineBuffer::new();
        assert!(buffer.push(b"data: caf\xc3").is_empty());
        let events = buffer.push(b"\xa9 au lait\n\n");
        assert_eq!(events, vec!["café au lait"]);
    }

    #[test]
    fn text_deltas_are_forwarded_and_accumulated() {
        let mut state = StreamState::new();
        let start = json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}});
        assert_eq!(state.apply(&start).unwrap(), None);

        let first = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}});
        let second = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}});
        assert_eq!(state.apply(&first).unwrap(), Some("Hel".to_string()));
        assert_eq!(state.apply(&second).unwrap(), Some("lo".to_string()));

        let outcome = state.into_outcome(false);
        assert_eq!(outcome.text, "Hello");
        assert!(outcome.tool_calls.is_empty());
    }

    #[test]
    fn tool_use_input_is_reassembled_from_json_deltas() {
        let mut state = StreamState::new();
        let start = json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {"type": "tool_use", "id": "tu_1", "name": "lookup"}
        });
        state.apply(&start).unwrap();

        for partial in ["{\"city\":", " \"Oslo\"}"] {
            let event = json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": partial}
            });
            assert_eq!(state.apply(&event).unwrap(), None);
        }

        let stop = json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}});
        state.apply(&stop).unwrap();

        let outcome = state.into_outcome(false);
        assert_eq!(outcome.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].id, "tu_1");
        assert_eq!(outcome.tool_calls[0].name, "lookup");
        assert_eq!(outcome.tool_calls[0].input, json!({"city": "Oslo"}));
    }

    #[test]
    fn empty_tool_input_defaults_to_empty_object() {
        let mut state = StreamState::new();
        let start = json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": "tu_2", "name": "ping"}
        });
        state.apply(&start).unwrap();

        let outcome = state.into_outcome(false);
        assert_eq!(outcome.tool_calls[0].input, json!({}));
    }

    #[test]
    fn error_event_surfaces_as_api_error() {
        let mut state = StreamState::new();
        let event = json!({"type": "error", "error": {"type": "overloaded_error", "message": "overloaded"}});
        let result = state.apply(&event);
        assert!(matches!(result, Err(Error::Api(message)) if message == "overloaded"));
    }

    #[test]
    fn assistant_message_carries_text_and_tool_use_blocks() {
        let outcome = StreamOutcome {
            text: "checking".to_string(),
            stop_reason: Some("tool_use".to_string()),
            tool_calls: vec![ToolUse {
                id: "tu_1".to_string(),
                name: "lookup".to_string(),
                input: json!({"city": "Oslo"}),
            }],
            abandoned: false,
        };

        let message = assistant_message(&outcome);
        assert_eq!(message.role, "assistant");
        let blocks = message.content.as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["name"], "lookup");
    }

    #[test]
    fn request_serialization_omits_empty_tools() {
        let messages = vec![ApiMessage {
            role: "user",
            content: Value::String("hi".to_string()),
        }];
        let system = SystemPrompt::Simple("be brief".to_string());
        let request = ApiRequest {
            model: "claude-sonnet-4-20250514",
            max_tokens: 64,
            stream: true,
            messages: &messages,
            system: Some(&system),
            tools: &[],
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], json!(true));
        assert_eq!(value["system"], json!("be brief"));
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn system_turns_map_into_user_position() {
        assert_eq!(role_to_api_str(Role::System), "user");
        assert_eq!(role_to_api_str(Role::User), "user");
        assert_eq!(role_to_api_str(Role::Assistant), "assistant");
    }
}
