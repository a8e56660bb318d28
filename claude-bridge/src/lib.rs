//! Claude Bridge Library
//!
//! A Rust library that exposes a turn-based "generate or stream a completion"
//! interface on top of the Claude agent runtime. The runtime accepts one prompt
//! per invocation; the bridge makes many invocations look like one stateful
//! conversation and routes caller-declared tools through the runtime's own
//! tool-use mechanism.
//!
//! ```no_run
//! use claude_bridge::{BridgeSettings, CallOptions, ClaudeBridgeModel, Message};
//!
//! # async fn run() -> claude_bridge::Result<()> {
//! let model = ClaudeBridgeModel::with_cli(BridgeSettings::from_env("claude-sonnet-4-20250514"))?;
//! let result = model
//!     .do_generate(CallOptions::new(vec![Message::user("Hello")]))
//!     .await?;
//! println!("{}", result.text());
//! # Ok(())
//! # }
//! ```

pub mod bridge_server;
pub mod cli_runtime;
pub mod config;
pub mod constants;
pub mod continuity;
pub mod error;
pub mod model;
pub mod output;
pub mod prompt;
pub mod prompt_serializer;
pub mod raw_messages;
pub mod recovery;
pub mod runtime;
pub mod session_cache;
pub mod session_key;
pub mod session_store;
pub mod stream_translator;
pub mod tool_bridge;
pub mod warnings;

pub use bridge_server::{start_bridge_server, BridgeServer, BridgeServerHandle};
pub use cli_runtime::ClaudeCliRuntime;
pub use config::{BridgeSettings, Effort, PermissionMode};
pub use continuity::{plan_query, ContinuityKind, PromptQueryInput};
pub use error::{BridgeError, Result};
pub use model::ClaudeBridgeModel;
pub use output::{
    Content, FinishReason, GenerateResult, ResponseMetadata, StreamPart, UnifiedFinishReason,
    Usage,
};
pub use prompt::{CallOptions, ContentPart, Message, ResponseFormat, ToolChoice, ToolDefinition};
pub use runtime::{AgentRuntime, RecordedRuntime, RuntimeOptions, RuntimeQuery};
pub use session_cache::{
    FileSessionCache, IncomingSessionCache, MemorySessionCache, NoopSessionCache,
};
pub use session_store::{IncomingSessionState, PromptSessionState, SessionStateStore};
pub use tool_bridge::{executor_fn, ToolBridge, ToolExecutionError, ToolExecutor};
pub use warnings::Warning;
