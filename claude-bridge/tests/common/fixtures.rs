//! Core test fixtures for common test setup patterns

use claude_bridge::{
    BridgeSettings, CallOptions, ClaudeBridgeModel, MemorySessionCache, Message, RecordedRuntime,
    StreamPart, ToolDefinition,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

pub const MODEL_ID: &str = "claude-test";

/// Settings that never touch the user's cache directory
pub fn settings() -> BridgeSettings {
    BridgeSettings::builder()
        .model_id(MODEL_ID)
        .persist_sessions(false)
        .build()
}

/// Model over `runtime` with an in-memory durable cache
pub fn model(runtime: Arc<RecordedRuntime>) -> ClaudeBridgeModel {
    ClaudeBridgeModel::new(settings(), runtime)
        .unwrap()
        .with_cache(Arc::new(MemorySessionCache::new()))
}

/// Recorded runtime playing back one invocation per entry
pub fn runtime(invocations: Vec<Vec<String>>) -> Arc<RecordedRuntime> {
    Arc::new(RecordedRuntime::from_outputs(invocations))
}

pub fn user_call(text: &str) -> CallOptions {
    CallOptions::new(vec![Message::user(text)])
}

pub fn bash_tool() -> ToolDefinition {
    ToolDefinition::function(
        "bash",
        "Run a shell command",
        json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"]
        }),
    )
}

/// Call options declaring the `bash` tool
pub fn tool_call(text: &str) -> CallOptions {
    let mut options = user_call(text);
    options.tools = vec![bash_tool()];
    options
}

/// Collect every part of a streamed call
pub async fn stream_parts(model: &ClaudeBridgeModel, options: CallOptions) -> Vec<StreamPart> {
    model.do_stream(options).await.unwrap().collect().await
}

/// Short name of each part, for order assertions
pub fn part_kinds(parts: &[StreamPart]) -> Vec<&'static str> {
    parts
        .iter()
        .map(|part| match part {
            StreamPart::StreamStart { .. } => "stream-start",
            StreamPart::ResponseMetadata(_) => "response-metadata",
            StreamPart::TextStart { .. } => "text-start",
            StreamPart::TextDelta { .. } => "text-delta",
            StreamPart::TextEnd { .. } => "text-end",
            StreamPart::ReasoningStart { .. } => "reasoning-start",
            StreamPart::ReasoningDelta { .. } => "reasoning-delta",
            StreamPart::ReasoningEnd { .. } => "reasoning-end",
            StreamPart::ToolInputStart { .. } => "tool-input-start",
            StreamPart::ToolInputDelta { .. } => "tool-input-delta",
            StreamPart::ToolInputEnd { .. } => "tool-input-end",
            StreamPart::ToolCall { .. } => "tool-call",
            StreamPart::Error { .. } => "error",
            StreamPart::Finish { .. } => "finish",
        })
        .collect()
}
