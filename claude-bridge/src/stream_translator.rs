//! Translation of raw partial events into unified stream parts
//!
//! [`StreamEventState`] is a small state machine keyed by the runtime's block
//! index. Every block it opens is closed exactly once, either by the runtime's
//! own `content_block_stop` or by [`StreamEventState::close_open_blocks`] at the
//! end of the stream, so consumers never see a `*-start` without its `*-end`.
//!
//! ```text
//! message_start        -> response-metadata (first time only)
//! content_block_start  -> text-start | reasoning-start | tool-input-start
//! content_block_delta  -> text-delta | reasoning-delta | tool-input-delta
//! content_block_stop   -> text-end   | reasoning-end   | tool-input-end
//! message_delta        -> (finish reason and usage bookkeeping only)
//! ```

use crate::output::{
    FinishReason, InputTokens, OutputTokens, ResponseMetadata, StreamPart, UnifiedFinishReason,
    Usage,
};
use crate::raw_messages::{AssistantMessage, PartialEvent, RawContentBlock, RawDelta, RawUsage};
use crate::tool_bridge::{from_bridge_tool_name, BridgeToolInputTracker, BridgedToolCall};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Reasoning,
    ToolInput,
}

/// One open block
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBlockState {
    pub kind: BlockKind,
    pub id: String,
    /// Whether this block's parts are forwarded to the consumer
    pub emitted: bool,
    tool: Option<ToolBlock>,
}

#[derive(Debug, Clone, PartialEq)]
struct ToolBlock {
    tool_name: String,
    provider_executed: bool,
    bridged: bool,
    fragments: Vec<String>,
    initial_input: Value,
}

/// How the translator treats the blocks it sees
#[derive(Debug, Clone, Default)]
pub struct TranslatorOptions {
    /// Caller-side names of declared tools
    pub declared_tools: HashSet<String>,
    /// Bridge tools are executed by the runtime itself
    pub native_execution: bool,
    /// Forward text blocks live; when false text is only buffered
    pub emit_text: bool,
}

/// Per-invocation translator state
#[derive(Debug, Default)]
pub struct StreamEventState {
    options: TranslatorOptions,
    blocks: BTreeMap<usize, StreamBlockState>,
    metadata_emitted: bool,
    response_metadata: ResponseMetadata,
    finish_reason_raw: Option<String>,
    usage: RawUsage,
    next_block_id: usize,
    tracker: BridgeToolInputTracker,
    turn_text: String,
    saw_partial_events: bool,
}

impl StreamEventState {
    pub fn new(options: TranslatorOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Translate one partial event into zero or more output parts
    pub fn translate_event(&mut self, event: &PartialEvent) -> Vec<StreamPart> {
        self.saw_partial_events = true;
        match event {
            PartialEvent::MessageStart { message } => {
                self.turn_text.clear();
                if let Some(usage) = &message.usage {
                    self.usage.merge(usage);
                }
                if self.metadata_emitted {
                    return Vec::new();
                }
                self.metadata_emitted = true;
                self.response_metadata = ResponseMetadata {
                    id: message.id.clone(),
                    model_id: message.model.clone(),
                    timestamp: Some(chrono::Utc::now()),
                };
                vec![StreamPart::ResponseMetadata(self.response_metadata.clone())]
            }
            PartialEvent::ContentBlockStart {
                index,
                content_block,
            } => self.start_block(*index, content_block),
            PartialEvent::ContentBlockDelta { index, delta } => self.block_delta(*index, delta),
            PartialEvent::ContentBlockStop { index } => match self.blocks.remove(index) {
                Some(block) => self.close_block(block),
                None => {
                    tracing::trace!("Stop for unknown block index {}", index);
                    Vec::new()
                }
            },
            PartialEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.finish_reason_raw = delta.stop_reason.clone();
                }
                if let Some(usage) = usage {
                    self.usage.merge(usage);
                }
                Vec::new()
            }
            PartialEvent::MessageStop | PartialEvent::Other => Vec::new(),
        }
    }

    /// Close every still-open block in index order
    pub fn close_open_blocks(&mut self) -> Vec<StreamPart> {
        let blocks = std::mem::take(&mut self.blocks);
        if !blocks.is_empty() {
            tracing::debug!("Synthetically closing {} open block(s)", blocks.len());
        }
        blocks
            .into_values()
            .flat_map(|block| self.close_block(block))
            .collect()
    }

    /// Synthesize parts for an assistant message that arrived without partial events
    ///
    /// Returns nothing if partial events were seen for this turn already.
    pub fn replay_assistant_message(&mut self, message: &AssistantMessage) -> Vec<StreamPart> {
        if std::mem::take(&mut self.saw_partial_events) {
            return Vec::new();
        }

        let mut parts = self.translate_event(&PartialEvent::MessageStart {
            message: crate::raw_messages::MessageStartInfo {
                id: message.id.clone(),
                model: message.model.clone(),
                usage: message.usage,
            },
        });

        let base = self.blocks.keys().next_back().map_or(0, |last| last + 1);
        for (offset, block) in message.content.iter().enumerate() {
            let index = base + offset;
            let delta = match block {
                RawContentBlock::Text { text } => Some(RawDelta::TextDelta { text: text.clone() }),
                RawContentBlock::Thinking { thinking } => Some(RawDelta::ThinkingDelta {
                    thinking: thinking.clone(),
                }),
                _ => None,
            };
            let start_block = match block {
                RawContentBlock::Text { .. } => RawContentBlock::Text {
                    text: String::new(),
                },
                RawContentBlock::Thinking { .. } => RawContentBlock::Thinking {
                    thinking: String::new(),
                },
                other => other.clone(),
            };

            parts.extend(self.translate_event(&PartialEvent::ContentBlockStart {
                index,
                content_block: start_block,
            }));
            if let Some(delta) = delta {
                parts.extend(self.translate_event(&PartialEvent::ContentBlockDelta { index, delta }));
            }
            parts.extend(self.translate_event(&PartialEvent::ContentBlockStop { index }));
        }

        if message.stop_reason.is_some() {
            self.finish_reason_raw = message.stop_reason.clone();
        }
        self.saw_partial_events = false;
        parts
    }

    pub fn open_block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn metadata_emitted(&self) -> bool {
        self.metadata_emitted
    }

    pub fn response_metadata(&self) -> &ResponseMetadata {
        &self.response_metadata
    }

    pub fn finish_reason_raw(&self) -> Option<&str> {
        self.finish_reason_raw.as_deref()
    }

    pub fn usage(&self) -> &RawUsage {
        &self.usage
    }

    /// Text produced by the current (last) assistant turn
    pub fn turn_text(&self) -> &str {
        &self.turn_text
    }

    /// Bridge tool calls completed during the stream
    pub fn bridged_tool_calls(&self) -> &[BridgedToolCall] {
        self.tracker.completed()
    }

    fn allocate_id(&mut self, prefix: &str) -> String {
        let id = format!("{}-{}", prefix, self.next_block_id);
        self.next_block_id += 1;
        id
    }

    fn start_block(&mut self, index: usize, content_block: &RawContentBlock) -> Vec<StreamPart> {
        if let Some(previous) = self.blocks.remove(&index) {
            tracing::warn!("Block index {} restarted before it was stopped", index);
            let mut parts = self.close_block(previous);
            parts.extend(self.start_block(index, content_block));
            return parts;
        }

        let (state, part) = match content_block {
            RawContentBlock::Text { text } => {
                let id = self.allocate_id("text");
                self.turn_text.push_str(text);
                let emitted = self.options.emit_text;
                let state = StreamBlockState {
                    kind: BlockKind::Text,
                    id: id.clone(),
                    emitted,
                    tool: None,
                };
                (state, emitted.then_some(StreamPart::TextStart { id }))
            }
            RawContentBlock::Thinking { .. } => {
                let id = self.allocate_id("reasoning");
                let state = StreamBlockState {
                    kind: BlockKind::Reasoning,
                    id: id.clone(),
                    emitted: true,
                    tool: None,
                };
                (state, Some(StreamPart::ReasoningStart { id }))
            }
            block => match block.as_tool_use() {
                Some((tool_call_id, runtime_name, input, server_side)) => {
                    let bridged =
                        self.tracker
                            .start(tool_call_id, tool_call_id, runtime_name, input);
                    let tool_name = from_bridge_tool_name(runtime_name).to_string();
                    let dynamic = !self.options.declared_tools.contains(&tool_name);
                    let provider_executed = server_side || self.options.native_execution;
                    let state = StreamBlockState {
                        kind: BlockKind::ToolInput,
                        id: tool_call_id.to_string(),
                        emitted: true,
                        tool: Some(ToolBlock {
                            tool_name: tool_name.clone(),
                            provider_executed,
                            bridged,
                            fragments: Vec::new(),
                            initial_input: input.clone(),
                        }),
                    };
                    let part = StreamPart::ToolInputStart {
                        id: tool_call_id.to_string(),
                        tool_name,
                        provider_executed,
                        dynamic,
                    };
                    (state, Some(part))
                }
                None => {
                    tracing::trace!("Ignoring unsupported content block at index {}", index);
                    return Vec::new();
                }
            },
        };

        tracing::trace!("Opened {:?} block {} at index {}", state.kind, state.id, index);
        self.blocks.insert(index, state);
        part.into_iter().collect()
    }

    fn block_delta(&mut self, index: usize, delta: &RawDelta) -> Vec<StreamPart> {
        let Some(block) = self.blocks.get_mut(&index) else {
            tracing::trace!("Delta for unknown block index {}", index);
            return Vec::new();
        };

        match (block.kind, delta) {
            (BlockKind::Text, RawDelta::TextDelta { text }) => {
                self.turn_text.push_str(text);
                if block.emitted {
                    vec![StreamPart::TextDelta {
                        id: block.id.clone(),
                        delta: text.clone(),
                    }]
                } else {
                    Vec::new()
                }
            }
            (BlockKind::Reasoning, RawDelta::ThinkingDelta { thinking }) => {
                vec![StreamPart::ReasoningDelta {
                    id: block.id.clone(),
                    delta: thinking.clone(),
                }]
            }
            (BlockKind::ToolInput, RawDelta::InputJsonDelta { partial_json }) => {
                if let Some(tool) = block.tool.as_mut() {
                    if tool.bridged {
                        self.tracker.push_delta(&block.id, partial_json);
                    } else {
                        tool.fragments.push(partial_json.clone());
                    }
                }
                vec![StreamPart::ToolInputDelta {
                    id: block.id.clone(),
                    delta: partial_json.clone(),
                }]
            }
            (_, RawDelta::SignatureDelta { .. }) | (_, RawDelta::Other) => Vec::new(),
            (kind, other) => {
                tracing::trace!("Ignoring {:?} for {:?} block {}", other, kind, block.id);
                Vec::new()
            }
        }
    }

    fn close_block(&mut self, block: StreamBlockState) -> Vec<StreamPart> {
        tracing::trace!("Closing {:?} block {}", block.kind, block.id);
        match block.kind {
            BlockKind::Text if block.emitted => vec![StreamPart::TextEnd { id: block.id }],
            BlockKind::Text => Vec::new(),
            BlockKind::Reasoning => vec![StreamPart::ReasoningEnd { id: block.id }],
            BlockKind::ToolInput => {
                let mut parts = vec![StreamPart::ToolInputEnd {
                    id: block.id.clone(),
                }];
                let Some(tool) = block.tool else {
                    return parts;
                };

                let call = if tool.bridged {
                    self.tracker.finish(&block.id)
                } else {
                    Some(
                        crate::tool_bridge::PendingBridgeToolInput {
                            tool_call_id: block.id.clone(),
                            tool_name: tool.tool_name.clone(),
                            deltas: tool.fragments,
                            initial_input: tool.initial_input,
                        }
                        .finish(),
                    )
                };

                if tool.provider_executed {
                    if let Some(call) = call {
                        parts.push(StreamPart::ToolCall {
                            tool_call_id: call.tool_call_id,
                            tool_name: call.tool_name,
                            input: call.input,
                            provider_executed: true,
                        });
                    }
                }
                parts
            }
        }
    }
}

/// Map a raw runtime stop reason to the unified finish reason
pub fn map_finish_reason(raw: Option<&str>) -> FinishReason {
    let unified = match raw {
        Some("tool_use") => UnifiedFinishReason::ToolCalls,
        Some("max_tokens") | Some("model_context_window_exceeded") => UnifiedFinishReason::Length,
        Some("refusal") => UnifiedFinishReason::ContentFilter,
        Some("pause_turn") | Some("compaction") => UnifiedFinishReason::Other,
        _ => UnifiedFinishReason::Stop,
    };
    FinishReason {
        unified,
        raw: raw.map(str::to_string),
    }
}

/// Map raw runtime token counts to unified usage
///
/// The runtime reports uncached input separately from cache reads and writes, so
/// the total is their sum and `no_cache` is what remains after subtracting cache traffic.
pub fn map_usage(raw: &RawUsage) -> Usage {
    let cache_read = raw.cache_read_input_tokens;
    let cache_write = raw.cache_creation_input_tokens;
    let total = match (raw.input_tokens, cache_read, cache_write) {
        (None, None, None) => None,
        (input, read, write) => {
            Some(input.unwrap_or(0) + read.unwrap_or(0) + write.unwrap_or(0))
        }
    };
    let no_cache = total.map(|total| {
        total
            .saturating_sub(cache_read.unwrap_or(0))
            .saturating_sub(cache_write.unwrap_or(0))
    });

    Usage {
        input_tokens: InputTokens {
            total,
            no_cache,
            cache_read,
            cache_write,
        },
        output_tokens: OutputTokens {
            total: raw.output_tokens,
            text: raw.output_tokens,
            reasoning: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_messages::{MessageDeltaInfo, MessageStartInfo};
    use serde_json::json;

    fn state() -> StreamEventState {
        StreamEventState::new(TranslatorOptions {
            declared_tools: ["bash".to_string()].into_iter().collect(),
            native_execution: false,
            emit_text: true,
        })
    }

    fn start(index: usize, block: RawContentBlock) -> PartialEvent {
        PartialEvent::ContentBlockStart {
            index,
            content_block: block,
        }
    }

    fn text_delta(index: usize, text: &str) -> PartialEvent {
        PartialEvent::ContentBlockDelta {
            index,
            delta: RawDelta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    fn stop(index: usize) -> PartialEvent {
        PartialEvent::ContentBlockStop { index }
    }

    #[test]
    fn test_text_block_lifecycle() {
        let mut state = state();
        let mut parts = Vec::new();
        for event in [
            start(0, RawContentBlock::Text { text: String::new() }),
            text_delta(0, "Hel"),
            text_delta(0, "lo"),
            stop(0),
        ] {
            parts.extend(state.translate_event(&event));
        }

        assert_eq!(
            parts,
            vec![
                StreamPart::TextStart { id: "text-0".to_string() },
                StreamPart::TextDelta { id: "text-0".to_string(), delta: "Hel".to_string() },
                StreamPart::TextDelta { id: "text-0".to_string(), delta: "lo".to_string() },
                StreamPart::TextEnd { id: "text-0".to_string() },
            ]
        );
        assert_eq!(state.turn_text(), "Hello");
        assert_eq!(state.open_block_count(), 0);
    }

    #[test]
    fn test_response_metadata_emitted_once() {
        let mut state = state();
        let message_start = PartialEvent::MessageStart {
            message: MessageStartInfo {
                id: Some("msg_1".to_string()),
                model: Some("claude-sonnet-4".to_string()),
                usage: None,
            },
        };

        let first = state.translate_event(&message_start);
        assert!(matches!(
            &first[..],
            [StreamPart::ResponseMetadata(meta)] if meta.id.as_deref() == Some("msg_1")
        ));
        assert!(state.translate_event(&message_start).is_empty());
    }

    #[test]
    fn test_open_blocks_closed_in_index_order() {
        let mut state = state();
        state.translate_event(&start(3, RawContentBlock::Thinking { thinking: String::new() }));
        state.translate_event(&start(1, RawContentBlock::Text { text: String::new() }));

        let closing = state.close_open_blocks();
        assert_eq!(
            closing,
            vec![
                StreamPart::TextEnd { id: "text-1".to_string() },
                StreamPart::ReasoningEnd { id: "reasoning-0".to_string() },
            ]
        );
        assert!(state.close_open_blocks().is_empty());
    }

    #[test]
    fn test_bridge_tool_block_is_tracked_and_renamed() {
        let mut state = state();
        let mut parts = state.translate_event(&start(
            0,
            RawContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "bridge__bash".to_string(),
                input: json!({}),
            },
        ));
        for fragment in ["{\"command\"", ":\"ls\"}"] {
            parts.extend(state.translate_event(&PartialEvent::ContentBlockDelta {
                index: 0,
                delta: RawDelta::InputJsonDelta {
                    partial_json: fragment.to_string(),
                },
            }));
        }
        parts.extend(state.translate_event(&stop(0)));

        assert_eq!(
            parts[0],
            StreamPart::ToolInputStart {
                id: "toolu_1".to_string(),
                tool_name: "bash".to_string(),
                provider_executed: false,
                dynamic: false,
            }
        );
        assert_eq!(parts.last(), Some(&StreamPart::ToolInputEnd { id: "toolu_1".to_string() }));
        assert!(!parts.iter().any(|p| matches!(p, StreamPart::ToolCall { .. })));

        let calls = state.bridged_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "bash");
        assert_eq!(calls[0].input, r#"{"command":"ls"}"#);
    }

    #[test]
    fn test_server_tool_is_provider_executed_and_dynamic() {
        let mut state = state();
        let mut parts = state.translate_event(&start(
            0,
            RawContentBlock::ServerToolUse {
                id: "srvtoolu_1".to_string(),
                name: "web_search".to_string(),
                input: json!({"query": "rust"}),
            },
        ));
        parts.extend(state.translate_event(&stop(0)));

        assert!(matches!(
            &parts[0],
            StreamPart::ToolInputStart { provider_executed: true, dynamic: true, .. }
        ));
        assert!(matches!(
            parts.last(),
            Some(StreamPart::ToolCall { provider_executed: true, input, .. }) if input == r#"{"query":"rust"}"#
        ));
        assert!(state.bridged_tool_calls().is_empty());
    }

    #[test]
    fn test_suppressed_text_is_buffered_only() {
        let mut state = StreamEventState::new(TranslatorOptions::default());
        let mut parts = Vec::new();
        for event in [
            start(0, RawContentBlock::Text { text: String::new() }),
            text_delta(0, "{\"type\":\"text\"}"),
            stop(0),
        ] {
            parts.extend(state.translate_event(&event));
        }
        assert!(parts.is_empty());
        assert_eq!(state.turn_text(), "{\"type\":\"text\"}");
    }

    #[test]
    fn test_message_delta_updates_finish_reason_and_usage() {
        let mut state = state();
        state.translate_event(&PartialEvent::MessageStart {
            message: MessageStartInfo {
                id: None,
                model: None,
                usage: Some(RawUsage {
                    input_tokens: Some(10),
                    cache_read_input_tokens: Some(5),
                    ..Default::default()
                }),
            },
        });
        let parts = state.translate_event(&PartialEvent::MessageDelta {
            delta: MessageDeltaInfo {
                stop_reason: Some("tool_use".to_string()),
            },
            usage: Some(RawUsage {
                output_tokens: Some(42),
                ..Default::default()
            }),
        });

        assert!(parts.is_empty());
        assert_eq!(state.finish_reason_raw(), Some("tool_use"));
        assert_eq!(state.usage().input_tokens, Some(10));
        assert_eq!(state.usage().output_tokens, Some(42));
    }

    #[test]
    fn test_replay_assistant_message_without_partials() {
        let mut state = state();
        let message = AssistantMessage {
            id: Some("msg_9".to_string()),
            content: vec![RawContentBlock::Text { text: "hi there".to_string() }],
            stop_reason: Some("end_turn".to_string()),
            ..Default::default()
        };

        let parts = state.replay_assistant_message(&message);
        assert!(matches!(parts[0], StreamPart::ResponseMetadata(_)));
        assert!(parts.contains(&StreamPart::TextDelta {
            id: "text-0".to_string(),
            delta: "hi there".to_string()
        }));
        assert_eq!(parts.last(), Some(&StreamPart::TextEnd { id: "text-0".to_string() }));
    }

    #[test]
    fn test_replay_skipped_after_partial_events() {
        let mut state = state();
        state.translate_event(&start(0, RawContentBlock::Text { text: String::new() }));
        state.translate_event(&stop(0));

        let message = AssistantMessage {
            content: vec![RawContentBlock::Text { text: "dup".to_string() }],
            ..Default::default()
        };
        assert!(state.replay_assistant_message(&message).is_empty());
    }

    #[test]
    fn test_finish_reason_mapping() {
        let cases = [
            (Some("tool_use"), UnifiedFinishReason::ToolCalls),
            (Some("max_tokens"), UnifiedFinishReason::Length),
            (Some("model_context_window_exceeded"), UnifiedFinishReason::Length),
            (Some("refusal"), UnifiedFinishReason::ContentFilter),
            (Some("pause_turn"), UnifiedFinishReason::Other),
            (Some("compaction"), UnifiedFinishReason::Other),
            (Some("end_turn"), UnifiedFinishReason::Stop),
            (Some("something_new"), UnifiedFinishReason::Stop),
            (None, UnifiedFinishReason::Stop),
        ];
        for (raw, unified) in cases {
            let reason = map_finish_reason(raw);
            assert_eq!(reason.unified, unified, "raw {:?}", raw);
            assert_eq!(reason.raw.as_deref(), raw);
        }
    }

    #[test]
    fn test_usage_mapping() {
        let usage = map_usage(&RawUsage {
            input_tokens: Some(100),
            output_tokens: Some(30),
            cache_read_input_tokens: Some(400),
            cache_creation_input_tokens: Some(50),
        });

        assert_eq!(usage.input_tokens.total, Some(550));
        assert_eq!(usage.input_tokens.no_cache, Some(100));
        assert_eq!(usage.input_tokens.cache_read, Some(400));
        assert_eq!(usage.input_tokens.cache_write, Some(50));
        assert_eq!(usage.output_tokens.total, Some(30));
        assert_eq!(usage.output_tokens.text, Some(30));
        assert_eq!(usage.output_tokens.reasoning, None);

        assert_eq!(map_usage(&RawUsage::default()), Usage::default());
    }
}
