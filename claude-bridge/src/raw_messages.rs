//! Typed boundary for raw runtime messages
//!
//! The runtime speaks newline-delimited stream-json. Each line is parsed here
//! into a small closed set of variants; nothing past this module looks at raw
//! JSON maps except tool inputs and structured-output payloads.
//!
//! ```json
//! {"type":"system","subtype":"init","session_id":"uuid","model":"claude-sonnet-4","tools":[...]}
//! {"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}
//! {"type":"assistant","message":{"id":"msg_1","content":[{"type":"tool_use","id":"toolu_1","name":"bridge__bash","input":{}}]}}
//! {"type":"result","subtype":"success","result":"Hi","session_id":"uuid","total_cost_usd":0.01}
//! ```

use crate::constants::sizes::logging::MAX_LOGGED_LINE_CHARS;
use crate::error::{BridgeError, Result};
use serde::Deserialize;
use serde_json::Value;

/// One message produced by the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    /// `system`/`init`: announces the session id before anything else
    SystemInit(SystemInit),
    /// Partial Messages-API event
    StreamEvent(StreamEventMessage),
    /// Complete assistant message for one turn
    Assistant(AssistantEnvelope),
    /// Terminal result message
    Result(ResultMessage),
    /// Any other message type (user echo, status, compaction markers, ...)
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemInit {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEventMessage {
    pub event: PartialEvent,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Set when the event belongs to a sub-agent rather than the main turn
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantEnvelope {
    pub message: AssistantMessage,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<RawContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

impl AssistantMessage {
    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                RawContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Terminal result of one runtime invocation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultMessage {
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ResultMessage {
    pub fn is_success(&self) -> bool {
        self.subtype == crate::constants::names::RESULT_SUCCESS && !self.is_error
    }
}

/// Token counts as reported by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

impl RawUsage {
    /// Overlay the fields present in `newer`; absent fields keep their value
    pub fn merge(&mut self, newer: &RawUsage) {
        self.input_tokens = newer.input_tokens.or(self.input_tokens);
        self.output_tokens = newer.output_tokens.or(self.output_tokens);
        self.cache_read_input_tokens = newer.cache_read_input_tokens.or(self.cache_read_input_tokens);
        self.cache_creation_input_tokens = newer
            .cache_creation_input_tokens
            .or(self.cache_creation_input_tokens);
    }
}

/// Partial Messages-API streaming event
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    MessageStart {
        message: MessageStartInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: RawContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: RawDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<RawUsage>,
    },
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageStartInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDeltaInfo {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Content block as it appears in `content_block_start` and assistant messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Tool executed by the provider itself (web search and friends)
    ServerToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Tool executed by an MCP server the runtime connected to
    McpToolUse {
        id: String,
        name: String,
        #[serde(default)]
        server_name: Option<String>,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

impl RawContentBlock {
    /// `(id, name, input, provider_executed)` for any tool-use variant
    pub fn as_tool_use(&self) -> Option<(&str, &str, &Value, bool)> {
        match self {
            RawContentBlock::ToolUse { id, name, input } => {
                Some((id.as_str(), name.as_str(), input, false))
            }
            RawContentBlock::ServerToolUse { id, name, input }
            | RawContentBlock::McpToolUse { id, name, input, .. } => {
                Some((id.as_str(), name.as_str(), input, true))
            }
            _ => None,
        }
    }

    fn tool_name_mut(&mut self) -> Option<&mut String> {
        match self {
            RawContentBlock::ToolUse { name, .. }
            | RawContentBlock::ServerToolUse { name, .. }
            | RawContentBlock::McpToolUse { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    SignatureDelta {
        #[serde(default)]
        signature: String,
    },
    #[serde(other)]
    Other,
}

impl RawMessage {
    /// Session id carried by this message, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            RawMessage::SystemInit(init) => init.session_id.as_deref(),
            RawMessage::StreamEvent(event) => event.session_id.as_deref(),
            RawMessage::Assistant(envelope) => envelope.session_id.as_deref(),
            RawMessage::Result(result) => result.session_id.as_deref(),
            RawMessage::Other { .. } => None,
        }
    }

    /// Rewrite tool names on every tool-use block this message carries
    ///
    /// `rename` returns `None` to leave a name untouched.
    pub fn rename_tools(&mut self, rename: impl Fn(&str) -> Option<String>) {
        let blocks: Vec<&mut RawContentBlock> = match self {
            RawMessage::StreamEvent(StreamEventMessage {
                event: PartialEvent::ContentBlockStart { content_block, .. },
                ..
            }) => vec![content_block],
            RawMessage::Assistant(envelope) => envelope.message.content.iter_mut().collect(),
            _ => Vec::new(),
        };

        for block in blocks {
            if let Some(name) = block.tool_name_mut() {
                if let Some(renamed) = rename(name) {
                    *name = renamed;
                }
            }
        }
    }
}

/// Parse one stream-json line
///
/// # Returns
/// * `Ok(Some(message))` for any well-formed message
/// * `Ok(None)` for blank lines
/// * `Err(BridgeError::Protocol)` for malformed JSON or a known type with the wrong shape
pub fn parse_line(line: &str) -> Result<Option<RawMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: Value = serde_json::from_str(line).map_err(|e| {
        BridgeError::Protocol(format!("Malformed JSON: {}. Line: {}...", e, truncate(line)))
    })?;
    parse_value(parsed).map(Some)
}

/// Parse an already-decoded stream-json value
pub fn parse_value(value: Value) -> Result<RawMessage> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::Protocol("Missing 'type' field in stream-json".to_string()))?
        .to_string();

    let message = match kind.as_str() {
        "system" if value.get("subtype").and_then(Value::as_str) == Some("init") => {
            RawMessage::SystemInit(decode(value, "system init")?)
        }
        "stream_event" => RawMessage::StreamEvent(decode(value, "stream event")?),
        "assistant" => RawMessage::Assistant(decode(value, "assistant message")?),
        "result" => RawMessage::Result(decode(value, "result message")?),
        _ => RawMessage::Other { kind },
    };
    Ok(message)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| BridgeError::Protocol(format!("Failed to parse {}: {}", what, e)))
}

fn truncate(line: &str) -> String {
    line.chars().take(MAX_LOGGED_LINE_CHARS).collect()
}
