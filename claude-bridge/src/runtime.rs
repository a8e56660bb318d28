//! Runtime port: the one capability the bridge needs from the agent runtime
//!
//! The bridge sends one prompt per invocation and consumes the raw messages the
//! runtime produces. Everything runtime-specific sits behind [`AgentRuntime`] so
//! the engine can run against the CLI ([`crate::cli_runtime::ClaudeCliRuntime`])
//! or against recorded fixtures ([`RecordedRuntime`]).
//!
//! # Fixtures
//!
//! ```json
//! {
//!   "invocations": [
//!     {
//!       "outputs": [
//!         "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s1\"}",
//!         "{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"Hi\",\"session_id\":\"s1\"}"
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::config::{Effort, PermissionMode};
use crate::error::{BridgeError, Result};
use crate::raw_messages::{parse_line, RawMessage};
use crate::tool_bridge::{is_bridge_tool_name, ToolBridge, ToolExecutionOutcome};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Stream of raw runtime messages for one invocation
pub type RawMessageStream = BoxStream<'static, Result<RawMessage>>;

/// Options for one runtime invocation
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub resume_session_id: Option<String>,
    /// Runtime-side names the runtime may call
    pub allowed_tools: Vec<String>,
    /// Turn off the runtime's own built-in tools
    pub disallow_builtin_tools: bool,
    /// Caller tools to serve to the runtime
    pub tool_bridge: Option<Arc<ToolBridge>>,
    pub permission_mode: PermissionMode,
    pub max_turns: Option<u32>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// JSON schema the final answer must satisfy
    pub output_schema: Option<Value>,
    pub effort: Option<Effort>,
    pub max_thinking_tokens: Option<u32>,
    pub include_partial_messages: bool,
    /// Cancelled when the invocation should stop
    pub cancel: CancellationToken,
}

/// One runtime invocation
#[derive(Debug, Clone)]
pub struct RuntimeQuery {
    pub prompt: String,
    pub options: RuntimeOptions,
}

/// Agent runtime capable of running one prompt
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start an invocation and return its raw message stream
    ///
    /// The stream ends after the result message, when the runtime exits, or
    /// when `options.cancel` fires.
    async fn query(&self, query: RuntimeQuery) -> Result<RawMessageStream>;
}

/// One recorded runtime invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedInvocation {
    /// Stream-json lines, in order
    pub outputs: Vec<String>,
    /// Fail the stream with this message after the outputs
    #[serde(default)]
    pub fail_with: Option<String>,
    /// Keep the stream open after the outputs until cancelled
    #[serde(default)]
    pub hang: bool,
}

/// Recorded fixture: one entry per expected invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedRun {
    pub invocations: Vec<RecordedInvocation>,
}

/// Runtime that plays back recorded invocations
///
/// Each `query` consumes the next invocation. Bridge tool calls found on
/// recorded assistant messages are executed through the query's tool bridge,
/// the way the real runtime calls them through the bridge server.
pub struct RecordedRuntime {
    run: RecordedRun,
    next: Mutex<usize>,
    queries: Mutex<Vec<RuntimeQuery>>,
    tool_results: Mutex<Vec<(String, ToolExecutionOutcome)>>,
}

impl RecordedRuntime {
    pub fn new(run: RecordedRun) -> Self {
        Self {
            run,
            next: Mutex::new(0),
            queries: Mutex::new(Vec::new()),
            tool_results: Mutex::new(Vec::new()),
        }
    }

    /// Playback of the given invocations, each a list of stream-json lines
    pub fn from_outputs<I, L>(invocations: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        Self::new(RecordedRun {
            invocations: invocations
                .into_iter()
                .map(|outputs| RecordedInvocation {
                    outputs: outputs.into_iter().map(Into::into).collect(),
                    ..Default::default()
                })
                .collect(),
        })
    }

    /// Load a recorded run from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Internal(format!("Failed to read fixture: {}", e)))?;
        let run: RecordedRun = serde_json::from_str(&content)
            .map_err(|e| BridgeError::Internal(format!("Failed to parse fixture JSON: {}", e)))?;
        Ok(Self::new(run))
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<RuntimeQuery> {
        self.queries
            .lock()
            .map(|queries| queries.clone())
            .unwrap_or_default()
    }

    /// Bridge tool executions performed so far, as `(tool call id, outcome)`
    pub fn tool_results(&self) -> Vec<(String, ToolExecutionOutcome)> {
        self.tool_results
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default()
    }

    fn take_invocation(&self) -> Result<RecordedInvocation> {
        let mut next = self
            .next
            .lock()
            .map_err(|_| BridgeError::Internal("Recorded runtime lock poisoned".to_string()))?;
        let invocation = self.run.invocations.get(*next).cloned().ok_or_else(|| {
            BridgeError::Runtime(format!(
                "Recorded run exhausted: invocation {} requested but only {} recorded",
                *next + 1,
                self.run.invocations.len()
            ))
        })?;
        *next += 1;
        Ok(invocation)
    }
}

#[async_trait]
impl AgentRuntime for RecordedRuntime {
    async fn query(&self, query: RuntimeQuery) -> Result<RawMessageStream> {
        let invocation = self.take_invocation()?;
        tracing::debug!(
            "RecordedRuntime: replaying {} line(s), resume={:?}",
            invocation.outputs.len(),
            query.options.resume_session_id
        );

        let bridge = query.options.tool_bridge.clone();
        let cancel = query.options.cancel.clone();
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query);
        }

        let mut items: Vec<Result<RawMessage>> = Vec::with_capacity(invocation.outputs.len());
        for line in &invocation.outputs {
            match parse_line(line) {
                Ok(Some(message)) => {
                    if let (Some(bridge), RawMessage::Assistant(envelope)) = (&bridge, &message) {
                        for block in &envelope.message.content {
                            let Some((id, name, input, false)) = block.as_tool_use() else {
                                continue;
                            };
                            if is_bridge_tool_name(name) {
                                let outcome = bridge.execute(name, input.clone()).await;
                                if let Ok(mut results) = self.tool_results.lock() {
                                    results.push((id.to_string(), outcome));
                                }
                            }
                        }
                    }
                    items.push(Ok(message));
                }
                Ok(None) => {}
                Err(e) => items.push(Err(e)),
            }
        }
        if let Some(message) = invocation.fail_with {
            items.push(Err(BridgeError::Runtime(message)));
        }

        let replay = stream::iter(items);
        let stream = if invocation.hang {
            replay.chain(stream::pending()).boxed()
        } else {
            replay.boxed()
        };

        Ok(stream
            .take_until(async move { cancel.cancelled().await })
            .boxed())
    }
}
