//! Generate and stream orchestration over one agent runtime
//!
//! [`ClaudeBridgeModel`] owns the session lists for one model id and drives one
//! runtime invocation per call:
//!
//! 1. serialize the prompt and resolve the caller's conversation key
//! 2. plan the query (resume or fresh) from remembered sessions
//! 3. pick the call mode from the declared tools and response format
//! 4. translate the raw message stream into unified parts
//! 5. recover the routed answer when tools are routed back to the caller
//! 6. remember the session the runtime reported
//!
//! Streaming calls emit `stream-start`, the translated block parts, any content
//! produced after the runtime finished, and exactly one `finish`.

use crate::cli_runtime::ClaudeCliRuntime;
use crate::config::BridgeSettings;
use crate::constants::names::{ABORTED, PROVIDER_NAMESPACE, STREAM_BRIDGE_ERROR};
use crate::continuity::{plan_query, PromptQueryInput};
use crate::error::{BridgeError, Result};
use crate::output::{
    Content, FinishReason, GenerateResult, ResponseMetadata, StreamPart, UnifiedFinishReason,
    Usage,
};
use crate::prompt::{CallOptions, ResponseFormat};
use crate::prompt_serializer::{serialize_prompt, SerializedPrompt};
use crate::raw_messages::{AssistantMessage, RawMessage, ResultMessage};
use crate::recovery::{
    failure_message, recover_routed_output, resolve_text_finish, resolve_tool_routing,
    strip_code_fence, RecoveryInputs,
};
use crate::runtime::{AgentRuntime, RawMessageStream, RuntimeOptions, RuntimeQuery};
use crate::session_cache::{FileSessionCache, IncomingSessionCache, LogOnce, NoopSessionCache};
use crate::session_key::resolve_incoming_session_key;
use crate::session_store::{IncomingSessionState, PromptSessionState, SessionStateStore};
use crate::stream_translator::{map_usage, StreamEventState, TranslatorOptions};
use crate::tool_bridge::{ToolBridge, ToolBridgeMode, ToolExecutor};
use crate::warnings::{collect_warnings, Warning};
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Block id used for text produced after the runtime finished
const RESULT_TEXT_ID: &str = "text-result";

/// How one call is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallMode {
    /// Plain text, streamed live
    Text,
    /// Text constrained by the caller's JSON schema
    Json,
    /// One turn; the requested tool call is returned to the caller unexecuted
    ToolRouting,
    /// Several turns; every tool call is executed through the bridge
    NativeExecution,
}

/// Everything decided before the runtime is invoked
struct PreparedCall {
    warnings: Vec<Warning>,
    serialized: SerializedPrompt,
    incoming_key: Option<String>,
    query: PromptQueryInput,
    mode: CallMode,
    bridge: Option<Arc<ToolBridge>>,
    json_schema: Option<Value>,
    cancel: CancellationToken,
}

enum Termination {
    Completed,
    Cancelled,
    Failed(BridgeError),
}

/// What one invocation produced
struct TurnSummary {
    content: Vec<Content>,
    reasoning: String,
    finish_reason: FinishReason,
    usage: Usage,
    provider_metadata: Value,
    response: ResponseMetadata,
    termination: Termination,
}

/// Per-invocation bookkeeping over the raw message stream
struct TurnState {
    mode: CallMode,
    translator: StreamEventState,
    session_id: Option<String>,
    result: Option<ResultMessage>,
    last_assistant: Option<AssistantMessage>,
    live_text: bool,
    reasoning: String,
}

impl TurnState {
    fn new(prepared: &PreparedCall) -> Self {
        let declared_tools: HashSet<String> = prepared
            .bridge
            .as_ref()
            .map(|bridge| {
                bridge
                    .declared_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            mode: prepared.mode,
            translator: StreamEventState::new(TranslatorOptions {
                declared_tools,
                native_execution: prepared.mode == CallMode::NativeExecution,
                emit_text: prepared.mode == CallMode::Text,
            }),
            session_id: None,
            result: None,
            last_assistant: None,
            live_text: false,
            reasoning: String::new(),
        }
    }

    fn observe(&mut self, message: RawMessage) -> Vec<StreamPart> {
        if let Some(session_id) = message.session_id() {
            if self.session_id.as_deref() != Some(session_id) {
                tracing::debug!("Runtime reported session {}", session_id);
                self.session_id = Some(session_id.to_string());
            }
        }

        let parts = match message {
            RawMessage::SystemInit(_) | RawMessage::Other { .. } => Vec::new(),
            RawMessage::StreamEvent(event) => {
                if event.parent_tool_use_id.is_some() {
                    return Vec::new();
                }
                self.translator.translate_event(&event.event)
            }
            RawMessage::Assistant(envelope) => {
                if envelope.parent_tool_use_id.is_some() {
                    return Vec::new();
                }
                let parts = self.translator.replay_assistant_message(&envelope.message);
                self.last_assistant = Some(envelope.message);
                parts
            }
            RawMessage::Result(result) => {
                tracing::debug!(
                    "Runtime result: subtype={}, turns={:?}",
                    result.subtype,
                    result.num_turns
                );
                self.result = Some(result);
                Vec::new()
            }
        };

        for part in &parts {
            match part {
                StreamPart::TextDelta { .. } => self.live_text = true,
                StreamPart::ReasoningDelta { delta, .. } => self.reasoning.push_str(delta),
                _ => {}
            }
        }
        parts
    }

    /// Raw stop reason from the stream, falling back to the result message
    fn stop_reason(&self) -> Option<String> {
        self.translator
            .finish_reason_raw()
            .map(str::to_string)
            .or_else(|| self.result.as_ref().and_then(|r| r.stop_reason.clone()))
    }

    /// Final answer text for the non-routing modes
    fn final_text(&self) -> String {
        let result_text = self
            .result
            .as_ref()
            .and_then(|result| result.result.clone())
            .filter(|text| !text.trim().is_empty());
        let turn_text = Some(self.translator.turn_text().to_string())
            .filter(|text| !text.trim().is_empty());

        match self.mode {
            CallMode::Text => turn_text.or(result_text).unwrap_or_default(),
            CallMode::NativeExecution => result_text.or(turn_text).unwrap_or_default(),
            CallMode::Json => match self
                .result
                .as_ref()
                .and_then(|result| result.structured_output.as_ref())
            {
                Some(Value::String(text)) => text.clone(),
                Some(value) => value.to_string(),
                None => result_text
                    .or(turn_text)
                    .map(|text| strip_code_fence(&text).to_string())
                    .unwrap_or_default(),
            },
            CallMode::ToolRouting => String::new(),
        }
    }

    /// Content and finish reason once the stream has completed normally
    fn resolve(&self) -> (Vec<Content>, FinishReason) {
        let stop_reason = self.stop_reason();

        if self.mode == CallMode::ToolRouting {
            let result_text = self
                .result
                .as_ref()
                .and_then(|result| result.result.as_deref())
                .unwrap_or_default();
            let buffered_text = if self.translator.turn_text().trim().is_empty() {
                result_text
            } else {
                self.translator.turn_text()
            };
            let recovered = recover_routed_output(&RecoveryInputs {
                structured_output: self
                    .result
                    .as_ref()
                    .and_then(|result| result.structured_output.as_ref()),
                streamed_calls: self.translator.bridged_tool_calls(),
                last_assistant: self.last_assistant.as_ref(),
                buffered_text,
            })
            .map(|(output, _)| output);
            let outcome =
                resolve_tool_routing(recovered, self.result.as_ref(), stop_reason.as_deref());
            return (outcome.content, outcome.finish_reason);
        }

        let text = self.final_text();
        let finish_reason =
            resolve_text_finish(!text.is_empty(), self.result.as_ref(), stop_reason.as_deref());
        let content = if !text.is_empty() {
            vec![Content::text(text)]
        } else if finish_reason.unified == UnifiedFinishReason::Error {
            vec![Content::Error {
                error: self
                    .result
                    .as_ref()
                    .map(failure_message)
                    .unwrap_or_else(|| "Runtime produced no output".to_string()),
            }]
        } else {
            Vec::new()
        };
        (content, finish_reason)
    }

    /// Stream parts for content produced after the runtime finished
    fn content_parts(&self, content: &[Content]) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        for item in content {
            match item {
                Content::Text { text } => {
                    if self.mode == CallMode::Text && self.live_text {
                        continue;
                    }
                    parts.push(StreamPart::TextStart {
                        id: RESULT_TEXT_ID.to_string(),
                    });
                    parts.push(StreamPart::TextDelta {
                        id: RESULT_TEXT_ID.to_string(),
                        delta: text.clone(),
                    });
                    parts.push(StreamPart::TextEnd {
                        id: RESULT_TEXT_ID.to_string(),
                    });
                }
                Content::ToolCall {
                    tool_call_id,
                    tool_name,
                    input,
                    provider_executed,
                } => parts.push(StreamPart::ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                    provider_executed: *provider_executed,
                }),
                Content::Error { error } => parts.push(StreamPart::Error {
                    error: error.clone(),
                }),
                Content::Reasoning { .. } => {}
            }
        }
        parts
    }
}

/// Language model backed by an agent runtime
#[derive(Clone)]
pub struct ClaudeBridgeModel {
    settings: Arc<BridgeSettings>,
    runtime: Arc<dyn AgentRuntime>,
    sessions: SessionStateStore,
    cache: Arc<dyn IncomingSessionCache>,
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
    cache_read_failure: Arc<LogOnce>,
    cache_write_failure: Arc<LogOnce>,
}

impl std::fmt::Debug for ClaudeBridgeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeBridgeModel")
            .field("model_id", &self.settings.model_id)
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ClaudeBridgeModel {
    /// Create a model over `runtime`
    ///
    /// Fails with [`BridgeError::Config`] if the settings are invalid. The durable
    /// cache is the file cache under `session_cache_dir` when persistence is on.
    pub fn new(settings: BridgeSettings, runtime: Arc<dyn AgentRuntime>) -> Result<Self> {
        settings.validate()?;

        let cache: Arc<dyn IncomingSessionCache> =
            match (settings.persist_sessions, &settings.session_cache_dir) {
                (true, Some(dir)) => Arc::new(FileSessionCache::new(dir.clone())),
                _ => Arc::new(NoopSessionCache),
            };

        Ok(Self {
            sessions: SessionStateStore::new(
                settings.prompt_session_capacity,
                settings.incoming_session_capacity,
            ),
            settings: Arc::new(settings),
            runtime,
            cache,
            executors: HashMap::new(),
            cache_read_failure: Arc::new(LogOnce::new()),
            cache_write_failure: Arc::new(LogOnce::new()),
        })
    }

    /// Create a model that drives the `claude` CLI
    pub fn with_cli(settings: BridgeSettings) -> Result<Self> {
        let runtime = Arc::new(ClaudeCliRuntime::from_settings(&settings));
        Self::new(settings, runtime)
    }

    /// Replace the durable session cache
    pub fn with_cache(mut self, cache: Arc<dyn IncomingSessionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Execute calls to the tool named `name` inside the bridge
    ///
    /// When every declared tool of a call has an executor the runtime runs them
    /// itself and returns a final text answer.
    pub fn with_tool_executor(
        mut self,
        name: impl Into<String>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        self.executors.insert(name.into(), executor);
        self
    }

    pub fn model_id(&self) -> &str {
        &self.settings.model_id
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Session lists owned by this instance
    pub fn sessions(&self) -> &SessionStateStore {
        &self.sessions
    }

    /// Run one call to completion
    ///
    /// Runtime failures that the bridge can describe (for example an empty
    /// routed answer) come back as `Ok` with an `error` finish reason. Transport
    /// failures while reading the runtime return `Err`, and a cancelled call
    /// returns [`BridgeError::Cancelled`].
    pub async fn do_generate(&self, options: CallOptions) -> Result<GenerateResult> {
        let prepared = self.prepare(&options).await?;
        let raw = self.runtime.query(self.runtime_query(&prepared)).await?;
        let summary = self.drive(&prepared, raw, |_| {}).await;

        match summary.termination {
            Termination::Completed => {}
            Termination::Cancelled => return Err(BridgeError::Cancelled),
            Termination::Failed(e) => return Err(e),
        }

        let mut content = Vec::with_capacity(summary.content.len() + 1);
        if !summary.reasoning.is_empty() {
            content.push(Content::Reasoning {
                text: summary.reasoning,
            });
        }
        content.extend(summary.content);

        Ok(GenerateResult {
            content,
            finish_reason: summary.finish_reason,
            usage: summary.usage,
            warnings: prepared.warnings,
            provider_metadata: summary.provider_metadata,
            response: summary.response,
        })
    }

    /// Start one call and stream its parts
    ///
    /// The stream always ends with exactly one `finish` part, including when the
    /// runtime stream fails or the call is cancelled. Dropping the stream cancels
    /// the runtime invocation.
    pub async fn do_stream(&self, options: CallOptions) -> Result<BoxStream<'static, StreamPart>> {
        let prepared = self.prepare(&options).await?;
        let raw = self.runtime.query(self.runtime_query(&prepared)).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(StreamPart::StreamStart {
            warnings: prepared.warnings.clone(),
        });

        let model = self.clone();
        tokio::spawn(async move {
            let cancel = prepared.cancel.clone();
            let summary = model
                .drive(&prepared, raw, move |part| {
                    if tx.send(part).is_err() {
                        cancel.cancel();
                    }
                })
                .await;
            if let Termination::Failed(e) = summary.termination {
                tracing::debug!("Stream finished after runtime failure: {}", e);
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn prepare(&self, options: &CallOptions) -> Result<PreparedCall> {
        let warnings = collect_warnings(options);
        let serialized = serialize_prompt(&options.prompt);
        if serialized.is_empty() {
            return Err(BridgeError::Session(
                "Prompt contains no user, assistant or tool messages".to_string(),
            ));
        }

        let incoming_key = resolve_incoming_session_key(options);
        let incoming_state = match &incoming_key {
            Some(key) => self.lookup_incoming_state(key).await,
            None => None,
        };
        let prompt_states = self.sessions.prompt_states().await;
        let query = plan_query(
            &options.prompt,
            &serialized,
            &prompt_states,
            incoming_state.as_ref(),
        );
        if query.prompt.trim().is_empty() {
            return Err(BridgeError::Session(
                "Prompt renders to no content".to_string(),
            ));
        }

        let bridge =
            ToolBridge::from_definitions(&options.bridgeable_tools(), &self.executors).map(Arc::new);
        let json_schema = match &options.response_format {
            Some(ResponseFormat::Json { schema }) => schema.clone(),
            _ => None,
        };
        let mode = match bridge.as_ref().map(|bridge| bridge.mode()) {
            Some(ToolBridgeMode::NativeExecution) => CallMode::NativeExecution,
            Some(ToolBridgeMode::ToolRouting) => CallMode::ToolRouting,
            None if json_schema.is_some() => CallMode::Json,
            None => CallMode::Text,
        };

        let cancel = options
            .abort
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        tracing::info!(
            "🚀 {} call: mode={:?}, messages={}, resume={:?}",
            self.settings.model_id,
            mode,
            serialized.len(),
            query.resume_session_id
        );

        Ok(PreparedCall {
            warnings,
            serialized,
            incoming_key,
            query,
            mode,
            bridge,
            json_schema,
            cancel,
        })
    }

    fn runtime_query(&self, prepared: &PreparedCall) -> RuntimeQuery {
        let settings = &self.settings;
        let mut options = RuntimeOptions {
            model_id: settings.model_id.clone(),
            system_prompt: prepared.serialized.system_prompt.clone(),
            resume_session_id: prepared.query.resume_session_id.clone(),
            permission_mode: settings.permission_mode,
            max_turns: settings.max_turns,
            env: settings.runtime_env(),
            cwd: settings.cwd.clone(),
            effort: settings.effort,
            max_thinking_tokens: settings.max_thinking_tokens,
            include_partial_messages: true,
            cancel: prepared.cancel.clone(),
            ..Default::default()
        };

        match prepared.mode {
            CallMode::Text => {}
            CallMode::Json => {
                options.output_schema = prepared.json_schema.clone();
            }
            CallMode::ToolRouting | CallMode::NativeExecution => {
                if let Some(bridge) = &prepared.bridge {
                    options.allowed_tools = bridge.allowed_tool_names();
                    options.disallow_builtin_tools = true;
                    if prepared.mode == CallMode::ToolRouting {
                        options.max_turns = Some(1);
                        options.output_schema = Some(bridge.tool_routing_output_schema());
                    }
                    options.tool_bridge = Some(bridge.clone());
                }
            }
        }

        RuntimeQuery {
            prompt: prepared.query.prompt.clone(),
            options,
        }
    }

    /// Consume the runtime stream, emitting parts as they are produced
    async fn drive<F>(
        &self,
        prepared: &PreparedCall,
        mut raw: RawMessageStream,
        mut emit: F,
    ) -> TurnSummary
    where
        F: FnMut(StreamPart) + Send,
    {
        let mut turn = TurnState::new(prepared);
        let mut failure = None;

        loop {
            let next = tokio::select! {
                _ = prepared.cancel.cancelled() => None,
                next = raw.next() => next,
            };
            match next {
                Some(Ok(message)) => {
                    for part in turn.observe(message) {
                        emit(part);
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("Runtime stream failed: {}", e);
                    failure = Some(e);
                    break;
                }
                None => break,
            }
        }
        drop(raw);

        let cancelled = failure.is_none() && prepared.cancel.is_cancelled();
        for part in turn.translator.close_open_blocks() {
            emit(part);
        }

        let (content, finish_reason, termination) = match failure {
            Some(e) => {
                let error = e.to_string();
                emit(StreamPart::Error {
                    error: error.clone(),
                });
                (
                    vec![Content::Error { error }],
                    FinishReason::new(UnifiedFinishReason::Error, STREAM_BRIDGE_ERROR),
                    Termination::Failed(e),
                )
            }
            None if cancelled => {
                tracing::info!("{} call cancelled", self.settings.model_id);
                (
                    Vec::new(),
                    FinishReason::new(UnifiedFinishReason::Other, ABORTED),
                    Termination::Cancelled,
                )
            }
            None => {
                let (content, finish_reason) = turn.resolve();
                for part in turn.content_parts(&content) {
                    emit(part);
                }
                (content, finish_reason, Termination::Completed)
            }
        };

        let response = if turn.translator.metadata_emitted() {
            turn.translator.response_metadata().clone()
        } else {
            let response = ResponseMetadata {
                id: None,
                model_id: Some(self.settings.model_id.clone()),
                timestamp: Some(chrono::Utc::now()),
            };
            emit(StreamPart::ResponseMetadata(response.clone()));
            response
        };

        let raw_usage = turn
            .result
            .as_ref()
            .and_then(|result| result.usage)
            .unwrap_or(*turn.translator.usage());
        let usage = map_usage(&raw_usage);
        let provider_metadata = self.provider_metadata(prepared, &turn);

        // Persist before `finish` so a follow-up call can resume this session
        if matches!(termination, Termination::Completed) {
            if let Some(session_id) = &turn.session_id {
                self.remember_session(prepared, session_id).await;
            }
        }

        tracing::info!(
            "✅ {} call finished: {:?} ({:?})",
            self.settings.model_id,
            finish_reason.unified,
            finish_reason.raw
        );
        emit(StreamPart::Finish {
            finish_reason: finish_reason.clone(),
            usage,
            provider_metadata: provider_metadata.clone(),
        });

        TurnSummary {
            content,
            reasoning: turn.reasoning,
            finish_reason,
            usage,
            provider_metadata,
            response,
            termination,
        }
    }

    fn provider_metadata(&self, prepared: &PreparedCall, turn: &TurnState) -> Value {
        let result = turn.result.as_ref();
        json!({
            PROVIDER_NAMESPACE: {
                "sessionId": turn.session_id,
                "costUsd": result.and_then(|r| r.total_cost_usd),
                "durationMs": result.and_then(|r| r.duration_ms),
                "numTurns": result.and_then(|r| r.num_turns),
                "resumed": prepared.query.is_resume(),
            }
        })
    }

    /// Incoming state for `key`, reading through to the durable cache on a miss
    async fn lookup_incoming_state(&self, key: &str) -> Option<IncomingSessionState> {
        if let Some(state) = self.sessions.incoming_state(key).await {
            return Some(state);
        }

        match self.cache.load(&self.settings.model_id, key).await {
            Ok(Some(state)) => {
                tracing::debug!("Hydrated incoming key '{}' from session cache", key);
                self.sessions.remember_incoming_state(state.clone()).await;
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                if self.cache_read_failure.first() {
                    tracing::warn!("Session cache read failed, continuing without it: {}", e);
                }
                None
            }
        }
    }

    async fn remember_session(&self, prepared: &PreparedCall, session_id: &str) {
        self.sessions
            .remember_prompt_state(PromptSessionState::new(
                session_id,
                prepared.serialized.messages.clone(),
            ))
            .await;

        let Some(key) = &prepared.incoming_key else {
            return;
        };
        let state =
            IncomingSessionState::from_fingerprints(key, session_id, &prepared.serialized.messages);
        self.sessions.remember_incoming_state(state.clone()).await;

        if let Err(e) = self.cache.store(&self.settings.model_id, &state).await {
            if self.cache_write_failure.first() {
                tracing::warn!("Session cache write failed, continuing without it: {}", e);
            }
        }
    }
}
