//! Unified output protocol produced by the bridge
//!
//! Single-shot calls return a [`GenerateResult`]; streaming calls yield an
//! ordered sequence of [`StreamPart`]s that always ends with exactly one
//! [`StreamPart::Finish`].

use crate::warnings::Warning;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-neutral finish reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnifiedFinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
}

/// Finish reason with the raw runtime value preserved for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishReason {
    pub unified: UnifiedFinishReason,
    pub raw: Option<String>,
}

impl FinishReason {
    pub fn new(unified: UnifiedFinishReason, raw: impl Into<String>) -> Self {
        Self {
            unified,
            raw: Some(raw.into()),
        }
    }

    pub fn stop() -> Self {
        Self {
            unified: UnifiedFinishReason::Stop,
            raw: None,
        }
    }
}

/// Input token breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputTokens {
    pub total: Option<u64>,
    pub no_cache: Option<u64>,
    pub cache_read: Option<u64>,
    pub cache_write: Option<u64>,
}

/// Output token breakdown; reasoning is never reported separately by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTokens {
    pub total: Option<u64>,
    pub text: Option<u64>,
    pub reasoning: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: InputTokens,
    pub output_tokens: OutputTokens,
}

/// Content produced by a single-shot call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Content {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        /// JSON-encoded tool input
        input: String,
        #[serde(rename = "providerExecuted", default)]
        provider_executed: bool,
    },
    /// Explicit error content, used instead of a silent empty answer
    Error {
        error: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// Response identification emitted once per invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub id: Option<String>,
    pub model_id: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Result of a single-shot call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateResult {
    pub content: Vec<Content>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub warnings: Vec<Warning>,
    pub provider_metadata: Value,
    pub response: ResponseMetadata,
}

impl GenerateResult {
    /// Concatenated text content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|content| match content {
                Content::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls in content order
    pub fn tool_calls(&self) -> Vec<&Content> {
        self.content
            .iter()
            .filter(|content| matches!(content, Content::ToolCall { .. }))
            .collect()
    }
}

/// One part of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    StreamStart {
        warnings: Vec<Warning>,
    },
    ResponseMetadata(ResponseMetadata),
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "providerExecuted")]
        provider_executed: bool,
        dynamic: bool,
    },
    /// Raw partial-JSON fragment of a tool input; never parsed at this stage
    ToolInputDelta {
        id: String,
        delta: String,
    },
    ToolInputEnd {
        id: String,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: String,
        #[serde(rename = "providerExecuted")]
        provider_executed: bool,
    },
    Error {
        error: String,
    },
    Finish {
        #[serde(rename = "finishReason")]
        finish_reason: FinishReason,
        usage: Usage,
        #[serde(rename = "providerMetadata")]
        provider_metadata: Value,
    },
}

impl StreamPart {
    /// Block id for lifecycle parts, `None` for everything else
    pub fn block_id(&self) -> Option<&str> {
        match self {
            StreamPart::TextStart { id }
            | StreamPart::TextDelta { id, .. }
            | StreamPart::TextEnd { id }
            | StreamPart::ReasoningStart { id }
            | StreamPart::ReasoningDelta { id, .. }
            | StreamPart::ReasoningEnd { id }
            | StreamPart::ToolInputStart { id, .. }
            | StreamPart::ToolInputDelta { id, .. }
            | StreamPart::ToolInputEnd { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_block_start(&self) -> bool {
        matches!(
            self,
            StreamPart::TextStart { .. }
                | StreamPart::ReasoningStart { .. }
                | StreamPart::ToolInputStart { .. }
        )
    }

    pub fn is_block_end(&self) -> bool {
        matches!(
            self,
            StreamPart::TextEnd { .. } | StreamPart::ReasoningEnd { .. } | StreamPart::ToolInputEnd { .. }
        )
    }
}
