//! Unified conversation and call-option types accepted by the bridge
//!
//! These mirror the provider-neutral language-model call shape: an ordered list
//! of role-tagged messages, optional tool declarations, and a bag of
//! provider options keyed by namespace.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// One message of the caller's conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: Vec<ContentPart> },
    Assistant { content: Vec<ContentPart> },
    Tool { content: Vec<ContentPart> },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System {
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant {
            content: vec![ContentPart::text(text)],
        }
    }

    /// Role tag used when rendering fingerprints
    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    /// Content parts of a non-system message; empty for system messages
    pub fn parts(&self) -> &[ContentPart] {
        match self {
            Message::System { .. } => &[],
            Message::User { content }
            | Message::Assistant { content }
            | Message::Tool { content } => content,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    /// Whether any part of this message is a tool call
    pub fn has_tool_call(&self) -> bool {
        self.parts()
            .iter()
            .any(|part| matches!(part, ContentPart::ToolCall { .. }))
    }
}

/// A single content part inside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// File or image payload; only the media type ever leaves this struct
    File {
        #[serde(rename = "mediaType")]
        media_type: String,
        data: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        output: Value,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// A tool declared by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ToolDefinition {
    Function {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "inputSchema")]
        input_schema: Value,
    },
    /// Provider-specific tool type; never bridged
    ProviderDefined { id: String, name: String },
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        ToolDefinition::Function {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::Function { name, .. } | ToolDefinition::ProviderDefined { name, .. } => {
                name
            }
        }
    }
}

/// How the model may pick tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Tool {
        #[serde(rename = "toolName")]
        tool_name: String,
    },
}

/// Requested response format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseFormat {
    Text,
    Json {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Value>,
    },
}

/// Options for one generate or stream call
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub prompt: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
    /// Request headers; names are matched case-insensitively
    pub headers: HashMap<String, String>,
    /// Telemetry metadata supplied by the caller
    pub telemetry_metadata: Map<String, Value>,
    /// Provider options keyed by namespace
    pub provider_options: Map<String, Value>,
    /// External cancellation signal
    pub abort: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new(prompt: Vec<Message>) -> Self {
        Self {
            prompt,
            ..Default::default()
        }
    }

    /// Function tools that may be bridged, honoring an explicit `none` tool choice
    pub fn bridgeable_tools(&self) -> Vec<&ToolDefinition> {
        if matches!(self.tool_choice, Some(ToolChoice::None)) {
            return Vec::new();
        }
        self.tools
            .iter()
            .filter(|tool| matches!(tool, ToolDefinition::Function { .. }))
            .collect()
    }
}
