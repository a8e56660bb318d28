//! Bridging caller-declared tools through the runtime's tool-use mechanism
//!
//! Caller tools are re-exposed to the runtime under a private `bridge__` prefix
//! (see [`to_bridge_tool_name`]). On the way back, the prefix is stripped again so
//! the caller only ever sees its own tool names.
//!
//! A [`ToolBridge`] runs in one of two modes:
//!
//! - [`ToolBridgeMode::NativeExecution`] when every declared tool has an executor.
//!   The runtime may take several turns, calling tools through the bridge server,
//!   and its final answer is returned as text.
//! - [`ToolBridgeMode::ToolRouting`] otherwise. The runtime gets a single turn and
//!   the requested tool call is recovered and handed back to the caller unexecuted.

use crate::constants::names::{BRIDGE_TOOL_PREFIX, TOOL_EXECUTION_DISABLED};
use crate::prompt::ToolDefinition;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Error type returned by tool executors
pub type ToolExecutionError = Box<dyn std::error::Error + Send + Sync>;

/// Private runtime-side name for a caller tool
pub fn to_bridge_tool_name(name: &str) -> String {
    format!("{}{}", BRIDGE_TOOL_PREFIX, name)
}

/// Caller-side name for a runtime tool name; identity for names without the prefix
pub fn from_bridge_tool_name(name: &str) -> &str {
    name.strip_prefix(BRIDGE_TOOL_PREFIX).unwrap_or(name)
}

pub fn is_bridge_tool_name(name: &str) -> bool {
    name.starts_with(BRIDGE_TOOL_PREFIX)
}

/// Executes one caller tool on behalf of the runtime
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, input: Value) -> Result<Value, ToolExecutionError>;
}

/// Adapter turning an async closure into a [`ToolExecutor`]
pub struct FnToolExecutor<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> ToolExecutor for FnToolExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolExecutionError>> + Send,
{
    async fn execute(&self, input: Value) -> Result<Value, ToolExecutionError> {
        (self.func)(input).await
    }
}

/// Wrap an async closure as a shareable executor
pub fn executor_fn<F, Fut>(func: F) -> Arc<dyn ToolExecutor>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolExecutionError>> + Send + 'static,
{
    Arc::new(FnToolExecutor { func })
}

/// One caller tool registered on the bridge
#[derive(Clone)]
pub struct BridgeTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub executor: Option<Arc<dyn ToolExecutor>>,
}

impl std::fmt::Debug for BridgeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeTool")
            .field("name", &self.name)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

impl BridgeTool {
    pub fn bridge_name(&self) -> String {
        to_bridge_tool_name(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolBridgeMode {
    NativeExecution,
    ToolRouting,
}

/// Result of running a bridge tool, as returned to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecutionOutcome {
    pub text: String,
    pub is_error: bool,
}

/// Caller tools registered for one invocation
#[derive(Debug, Clone)]
pub struct ToolBridge {
    tools: Vec<BridgeTool>,
}

impl ToolBridge {
    pub fn new(tools: Vec<BridgeTool>) -> Self {
        Self { tools }
    }

    /// Build a bridge from declared function tools and the known executors
    ///
    /// Returns `None` when there is nothing to bridge.
    pub fn from_definitions(
        definitions: &[&ToolDefinition],
        executors: &HashMap<String, Arc<dyn ToolExecutor>>,
    ) -> Option<Self> {
        let tools: Vec<BridgeTool> = definitions
            .iter()
            .filter_map(|definition| match definition {
                ToolDefinition::Function {
                    name,
                    description,
                    input_schema,
                } => Some(BridgeTool {
                    name: name.clone(),
                    description: description.clone(),
                    input_schema: input_schema.clone(),
                    executor: executors.get(name).cloned(),
                }),
                ToolDefinition::ProviderDefined { .. } => None,
            })
            .collect();

        if tools.is_empty() {
            None
        } else {
            Some(Self::new(tools))
        }
    }

    pub fn tools(&self) -> &[BridgeTool] {
        &self.tools
    }

    pub fn mode(&self) -> ToolBridgeMode {
        if self.tools.iter().all(|tool| tool.executor.is_some()) {
            ToolBridgeMode::NativeExecution
        } else {
            ToolBridgeMode::ToolRouting
        }
    }

    /// Caller-side tool names
    pub fn declared_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name.as_str()).collect()
    }

    /// Whether `name` (either side of the rewrite) is a declared tool
    pub fn is_declared(&self, name: &str) -> bool {
        let name = from_bridge_tool_name(name);
        self.tools.iter().any(|tool| tool.name == name)
    }

    /// Bridge names for the runtime allow-list
    pub fn allowed_tool_names(&self) -> Vec<String> {
        self.tools.iter().map(BridgeTool::bridge_name).collect()
    }

    pub fn find(&self, bridge_name: &str) -> Option<&BridgeTool> {
        let name = from_bridge_tool_name(bridge_name);
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Run the tool behind `bridge_name`
    ///
    /// Never fails: unknown tools, missing executors and executor errors all
    /// become error-flagged outcomes for the runtime to read.
    pub async fn execute(&self, bridge_name: &str, input: Value) -> ToolExecutionOutcome {
        let Some(tool) = self.find(bridge_name) else {
            tracing::warn!("Runtime called undeclared bridge tool '{}'", bridge_name);
            return ToolExecutionOutcome {
                text: format!("Unknown tool: {}", from_bridge_tool_name(bridge_name)),
                is_error: true,
            };
        };

        let Some(executor) = &tool.executor else {
            tracing::debug!("Tool '{}' has no executor, returning disabled result", tool.name);
            return ToolExecutionOutcome {
                text: TOOL_EXECUTION_DISABLED.to_string(),
                is_error: true,
            };
        };

        tracing::debug!("🔧 Executing bridge tool '{}'", tool.name);
        match executor.execute(input).await {
            Ok(output) => ToolExecutionOutcome {
                text: stringify_output(&output),
                is_error: false,
            },
            Err(e) => {
                tracing::debug!("Bridge tool '{}' failed: {}", tool.name, e);
                ToolExecutionOutcome {
                    text: e.to_string(),
                    is_error: true,
                }
            }
        }
    }

    /// JSON schema for the structured envelope used in tool-routing mode
    pub fn tool_routing_output_schema(&self) -> Value {
        tool_routing_output_schema(&self.declared_names())
    }
}

fn stringify_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Schema for `{type:"tool-calls", calls:[{toolName, input}]}` or `{type:"text", text}`
pub fn tool_routing_output_schema(tool_names: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "type": {"type": "string", "enum": ["tool-calls", "text"]},
            "text": {"type": "string"},
            "calls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "toolName": {"type": "string", "enum": tool_names},
                        "input": {"type": "object"}
                    },
                    "required": ["toolName", "input"]
                }
            }
        },
        "required": ["type"]
    })
}

/// Streamed input fragments of one bridged tool call
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBridgeToolInput {
    pub tool_call_id: String,
    /// Caller-side tool name
    pub tool_name: String,
    pub deltas: Vec<String>,
    /// Input carried on the block start; used when no deltas arrive
    pub initial_input: Value,
}

impl PendingBridgeToolInput {
    /// Concatenated fragments, normalized if they parse as JSON and passed through raw otherwise
    pub fn finish(self) -> BridgedToolCall {
        let raw: String = self.deltas.concat();
        let input = if raw.trim().is_empty() {
            match &self.initial_input {
                Value::Null => "{}".to_string(),
                value => value.to_string(),
            }
        } else {
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => value.to_string(),
                Err(_) => raw,
            }
        };

        BridgedToolCall {
            tool_call_id: self.tool_call_id,
            tool_name: self.tool_name,
            input,
        }
    }
}

/// A complete tool call recovered from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgedToolCall {
    pub tool_call_id: String,
    /// Caller-side tool name
    pub tool_name: String,
    /// JSON-encoded input
    pub input: String,
}

/// Buffers streamed input for bridge-prefixed tool blocks, keyed by block id
#[derive(Debug, Default)]
pub struct BridgeToolInputTracker {
    pending: HashMap<String, PendingBridgeToolInput>,
    completed: Vec<BridgedToolCall>,
}

impl BridgeToolInputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a block if `runtime_name` is a bridge tool; returns whether it is tracked
    pub fn start(
        &mut self,
        block_id: &str,
        tool_call_id: &str,
        runtime_name: &str,
        initial_input: &Value,
    ) -> bool {
        if !is_bridge_tool_name(runtime_name) {
            return false;
        }
        self.pending.insert(
            block_id.to_string(),
            PendingBridgeToolInput {
                tool_call_id: tool_call_id.to_string(),
                tool_name: from_bridge_tool_name(runtime_name).to_string(),
                deltas: Vec::new(),
                initial_input: initial_input.clone(),
            },
        );
        true
    }

    pub fn push_delta(&mut self, block_id: &str, delta: &str) {
        if let Some(pending) = self.pending.get_mut(block_id) {
            pending.deltas.push(delta.to_string());
        }
    }

    /// Complete the block and return its call, if the block was tracked
    pub fn finish(&mut self, block_id: &str) -> Option<BridgedToolCall> {
        let call = self.pending.remove(block_id)?.finish();
        self.completed.push(call.clone());
        Some(call)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Calls completed so far, in completion order
    pub fn completed(&self) -> &[BridgedToolCall] {
        &self.completed
    }
}
