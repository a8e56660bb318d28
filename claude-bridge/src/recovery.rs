//! Recovery of a routed answer from degraded runtime output
//!
//! In tool-routing mode the runtime gets one turn to answer with either a tool
//! call or text. The answer can surface in several places depending on how the
//! run ended, so the sources are tried in a fixed order and the first one that
//! yields anything wins:
//!
//! 1. the result message's structured output (envelope or legacy single call)
//! 2. bridge tool blocks buffered from the stream
//! 3. tool-use blocks on the last assistant message
//! 4. the assistant's buffered text, parsed as an envelope or taken as plain text
//!
//! If nothing is recovered the outcome is an explicit error. An empty answer is
//! never returned silently.

use crate::constants::names::{EMPTY_TOOL_ROUTING_OUTPUT, STRUCTURED_OUTPUT_EXHAUSTED};
use crate::output::{Content, FinishReason, UnifiedFinishReason};
use crate::raw_messages::{AssistantMessage, ResultMessage};
use crate::stream_translator::map_finish_reason;
use crate::tool_bridge::{from_bridge_tool_name, is_bridge_tool_name, BridgedToolCall};
use serde::Deserialize;
use serde_json::Value;

/// Answer recovered from the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveredOutput {
    ToolCalls(Vec<BridgedToolCall>),
    Text(String),
}

/// Where a recovered answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    StructuredOutput,
    StreamedToolBlocks,
    AssistantToolUse,
    BufferedText,
}

/// Everything the cascade may draw from
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryInputs<'a> {
    pub structured_output: Option<&'a Value>,
    pub streamed_calls: &'a [BridgedToolCall],
    pub last_assistant: Option<&'a AssistantMessage>,
    pub buffered_text: &'a str,
}

type RecoveryStep = fn(&RecoveryInputs<'_>) -> Option<RecoveredOutput>;

const CASCADE: [(RecoverySource, RecoveryStep); 4] = [
    (RecoverySource::StructuredOutput, from_structured_output),
    (RecoverySource::StreamedToolBlocks, from_streamed_blocks),
    (RecoverySource::AssistantToolUse, from_assistant_tool_use),
    (RecoverySource::BufferedText, from_buffered_text),
];

/// Run the cascade and return the first recovered answer
pub fn recover_routed_output(inputs: &RecoveryInputs<'_>) -> Option<(RecoveredOutput, RecoverySource)> {
    let recovered = CASCADE
        .iter()
        .find_map(|(source, step)| step(inputs).map(|output| (output, *source)));

    match &recovered {
        Some((output, source)) => tracing::debug!(
            "Recovered {} from {:?}",
            match output {
                RecoveredOutput::ToolCalls(calls) => format!("{} tool call(s)", calls.len()),
                RecoveredOutput::Text(_) => "text".to_string(),
            },
            source
        ),
        None => tracing::debug!("Recovery cascade found nothing"),
    }
    recovered
}

fn from_structured_output(inputs: &RecoveryInputs<'_>) -> Option<RecoveredOutput> {
    match inputs.structured_output? {
        Value::String(text) => parse_envelope_text(text),
        value => parse_envelope(value),
    }
}

fn from_streamed_blocks(inputs: &RecoveryInputs<'_>) -> Option<RecoveredOutput> {
    if inputs.streamed_calls.is_empty() {
        None
    } else {
        Some(RecoveredOutput::ToolCalls(inputs.streamed_calls.to_vec()))
    }
}

fn from_assistant_tool_use(inputs: &RecoveryInputs<'_>) -> Option<RecoveredOutput> {
    let calls: Vec<BridgedToolCall> = inputs
        .last_assistant?
        .content
        .iter()
        .filter_map(|block| block.as_tool_use())
        .filter(|(_, name, _, provider_executed)| !provider_executed && is_bridge_tool_name(name))
        .map(|(id, name, input, _)| BridgedToolCall {
            tool_call_id: id.to_string(),
            tool_name: from_bridge_tool_name(name).to_string(),
            input: encode_input(Some(input)),
        })
        .collect();

    if calls.is_empty() {
        None
    } else {
        Some(RecoveredOutput::ToolCalls(calls))
    }
}

fn from_buffered_text(inputs: &RecoveryInputs<'_>) -> Option<RecoveredOutput> {
    let text = inputs.buffered_text.trim();
    if text.is_empty() {
        return None;
    }
    parse_envelope_text(text).or_else(|| Some(RecoveredOutput::Text(text.to_string())))
}

/// Structured envelope carried through a text channel
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Envelope {
    ToolCalls {
        #[serde(default)]
        calls: Vec<EnvelopeCall>,
    },
    Text {
        #[serde(default)]
        text: String,
    },
}

#[derive(Debug, Deserialize)]
struct EnvelopeCall {
    #[serde(rename = "toolName", alias = "name", alias = "tool")]
    tool_name: String,
    #[serde(default, alias = "arguments", alias = "parameters")]
    input: Option<Value>,
    #[serde(default, rename = "toolCallId", alias = "id")]
    tool_call_id: Option<String>,
}

/// Pre-envelope shape: a single call without a `type` tag
#[derive(Debug, Deserialize)]
struct LegacyCall {
    tool: String,
    #[serde(default, alias = "input", alias = "arguments")]
    parameters: Option<Value>,
}

/// Parse a JSON value as a tool-calls/text envelope or a legacy single call
pub fn parse_envelope(value: &Value) -> Option<RecoveredOutput> {
    if let Ok(envelope) = serde_json::from_value::<Envelope>(value.clone()) {
        return match envelope {
            Envelope::ToolCalls { calls } => {
                let calls: Vec<BridgedToolCall> = calls
                    .into_iter()
                    .filter(|call| !call.tool_name.trim().is_empty())
                    .map(|call| BridgedToolCall {
                        tool_call_id: call.tool_call_id.unwrap_or_else(generate_call_id),
                        tool_name: from_bridge_tool_name(&call.tool_name).to_string(),
                        input: encode_input(call.input.as_ref()),
                    })
                    .collect();
                (!calls.is_empty()).then_some(RecoveredOutput::ToolCalls(calls))
            }
            Envelope::Text { text } => {
                (!text.trim().is_empty()).then_some(RecoveredOutput::Text(text))
            }
        };
    }

    let legacy = serde_json::from_value::<LegacyCall>(value.clone()).ok()?;
    if legacy.tool.trim().is_empty() {
        return None;
    }
    Some(RecoveredOutput::ToolCalls(vec![BridgedToolCall {
        tool_call_id: generate_call_id(),
        tool_name: from_bridge_tool_name(&legacy.tool).to_string(),
        input: encode_input(legacy.parameters.as_ref()),
    }]))
}

/// Parse text (optionally wrapped in a code fence) as an envelope
pub fn parse_envelope_text(text: &str) -> Option<RecoveredOutput> {
    let value: Value = serde_json::from_str(strip_code_fence(text)).ok()?;
    parse_envelope(&value)
}

/// Strip a surrounding markdown code fence, with or without a language tag
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    match body.find('\n') {
        Some(newline) if !body[..newline].trim_start().starts_with(['{', '[']) => {
            body[newline + 1..].trim()
        }
        _ => body.trim(),
    }
}

fn encode_input(input: Option<&Value>) -> String {
    match input {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => parsed.to_string(),
            Err(_) => raw.clone(),
        },
        Some(value) => value.to_string(),
    }
}

fn generate_call_id() -> String {
    format!("call_{}", ulid::Ulid::new())
}

/// Final content and finish reason of one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutcome {
    pub content: Vec<Content>,
    pub finish_reason: FinishReason,
}

/// Outcome of a tool-routing invocation
///
/// `result` is `None` when the stream ended without a result message.
pub fn resolve_tool_routing(
    recovered: Option<RecoveredOutput>,
    result: Option<&ResultMessage>,
    stream_stop_reason: Option<&str>,
) -> ResolvedOutcome {
    let failed = result.is_some_and(|result| !result.is_success());

    match recovered {
        Some(RecoveredOutput::ToolCalls(calls)) => {
            if failed {
                tracing::debug!(
                    "Downgrading runtime failure {:?} to tool-calls",
                    result.map(|r| r.subtype.as_str())
                );
            }
            ResolvedOutcome {
                content: calls
                    .into_iter()
                    .map(|call| Content::ToolCall {
                        tool_call_id: call.tool_call_id,
                        tool_name: call.tool_name,
                        input: call.input,
                        provider_executed: false,
                    })
                    .collect(),
                finish_reason: FinishReason::new(UnifiedFinishReason::ToolCalls, "tool_use"),
            }
        }
        Some(RecoveredOutput::Text(text)) => ResolvedOutcome {
            content: vec![Content::text(text)],
            finish_reason: text_finish_reason(failed, stream_stop_reason),
        },
        None => match result {
            Some(result) if failed => ResolvedOutcome {
                content: vec![Content::Error {
                    error: failure_message(result),
                }],
                finish_reason: FinishReason::new(UnifiedFinishReason::Error, result.subtype.clone()),
            },
            _ => {
                tracing::warn!("Tool routing produced neither a tool call nor text");
                ResolvedOutcome {
                    content: vec![Content::Error {
                        error: "The model returned an empty response in tool routing mode"
                            .to_string(),
                    }],
                    finish_reason: FinishReason::new(
                        UnifiedFinishReason::Error,
                        EMPTY_TOOL_ROUTING_OUTPUT,
                    ),
                }
            }
        },
    }
}

/// Finish reason for a text answer outside tool routing
///
/// A non-success result stays an error unless it is the retryable structured
/// output failure and text was produced anyway.
pub fn resolve_text_finish(
    has_text: bool,
    result: Option<&ResultMessage>,
    stream_stop_reason: Option<&str>,
) -> FinishReason {
    match result {
        Some(result) if !result.is_success() => {
            if has_text && result.subtype == STRUCTURED_OUTPUT_EXHAUSTED {
                tracing::debug!("Downgrading {} to stop, text was produced", result.subtype);
                text_finish_reason(true, stream_stop_reason)
            } else {
                FinishReason::new(UnifiedFinishReason::Error, result.subtype.clone())
            }
        }
        _ => map_finish_reason(stream_stop_reason),
    }
}

/// Human-readable description of a failed result
pub fn failure_message(result: &ResultMessage) -> String {
    if result.errors.is_empty() {
        match &result.result {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => format!("Runtime reported {}", result.subtype),
        }
    } else {
        result.errors.join("; ")
    }
}

fn text_finish_reason(downgraded: bool, stream_stop_reason: Option<&str>) -> FinishReason {
    let mapped = map_finish_reason(stream_stop_reason);
    if downgraded || mapped.unified == UnifiedFinishReason::ToolCalls {
        FinishReason {
            unified: UnifiedFinishReason::Stop,
            raw: mapped.raw,
        }
    } else {
        mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_messages::RawContentBlock;
    use serde_json::json;

    fn call(id: &str, name: &str, input: &str) -> BridgedToolCall {
        BridgedToolCall {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            input: input.to_string(),
        }
    }

    fn result(subtype: &str) -> ResultMessage {
        ResultMessage {
            subtype: subtype.to_string(),
            is_error: subtype != "success",
            ..Default::default()
        }
    }

    #[test]
    fn test_structured_envelope_wins_over_streamed_blocks() {
        let structured = json!({
            "type": "tool-calls",
            "calls": [{"toolName": "read", "input": {"path": "a.txt"}}]
        });
        let streamed = vec![call("toolu_1", "bash", r#"{"command":"ls"}"#)];
        let inputs = RecoveryInputs {
            structured_output: Some(&structured),
            streamed_calls: &streamed,
            ..Default::default()
        };

        let (output, source) = recover_routed_output(&inputs).unwrap();
        assert_eq!(source, RecoverySource::StructuredOutput);
        let RecoveredOutput::ToolCalls(calls) = output else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].tool_name, "read");
        assert_eq!(calls[0].input, r#"{"path":"a.txt"}"#);
        assert!(calls[0].tool_call_id.starts_with("call_"));
    }

    #[test]
    fn test_legacy_single_call_shapes() {
        for key in ["parameters", "input", "arguments"] {
            let value = json!({"tool": "bridge__bash", key: {"command": "ls"}});
            assert_eq!(
                parse_envelope(&value).map(|output| match output {
                    RecoveredOutput::ToolCalls(calls) => (calls[0].tool_name.clone(), calls[0].input.clone()),
                    RecoveredOutput::Text(_) => panic!("expected call"),
                }),
                Some(("bash".to_string(), r#"{"command":"ls"}"#.to_string()))
            );
        }
    }

    #[test]
    fn test_streamed_blocks_used_when_no_structured_output() {
        let streamed = vec![call("toolu_1", "bash", r#"{"command":"ls"}"#)];
        let inputs = RecoveryInputs {
            streamed_calls: &streamed,
            buffered_text: "ignored",
            ..Default::default()
        };
        assert_eq!(
            recover_routed_output(&inputs),
            Some((
                RecoveredOutput::ToolCalls(streamed.clone()),
                RecoverySource::StreamedToolBlocks
            ))
        );
    }

    #[test]
    fn test_assistant_tool_use_blocks() {
        let assistant = AssistantMessage {
            content: vec![
                RawContentBlock::Text { text: "calling".to_string() },
                RawContentBlock::ToolUse {
                    id: "toolu_9".to_string(),
                    name: "bridge__bash".to_string(),
                    input: json!({"command": "pwd"}),
                },
                RawContentBlock::ServerToolUse {
                    id: "srv_1".to_string(),
                    name: "web_search".to_string(),
                    input: json!({}),
                },
            ],
            ..Default::default()
        };
        let inputs = RecoveryInputs {
            last_assistant: Some(&assistant),
            ..Default::default()
        };

        let (output, source) = recover_routed_output(&inputs).unwrap();
        assert_eq!(source, RecoverySource::AssistantToolUse);
        assert_eq!(
            output,
            RecoveredOutput::ToolCalls(vec![call("toolu_9", "bash", r#"{"command":"pwd"}"#)])
        );
    }

    #[test]
    fn test_buffered_text_envelope_in_code_fence() {
        let text = "```json\n{\"type\":\"tool-calls\",\"calls\":[{\"toolName\":\"bash\",\"input\":\"{\\\"command\\\":\\\"ls\\\"}\"}]}\n```";
        let inputs = RecoveryInputs {
            buffered_text: text,
            ..Default::default()
        };

        let (output, source) = recover_routed_output(&inputs).unwrap();
        assert_eq!(source, RecoverySource::BufferedText);
        let RecoveredOutput::ToolCalls(calls) = output else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].input, r#"{"command":"ls"}"#);
    }

    #[test]
    fn test_buffered_plain_text_is_a_text_answer() {
        let inputs = RecoveryInputs {
            buffered_text: "  The answer is 4.  ",
            ..Default::default()
        };
        assert_eq!(
            recover_routed_output(&inputs).map(|(output, _)| output),
            Some(RecoveredOutput::Text("The answer is 4.".to_string()))
        );
    }

    #[test]
    fn test_text_envelope_and_empty_envelopes() {
        assert_eq!(
            parse_envelope(&json!({"type": "text", "text": "hi"})),
            Some(RecoveredOutput::Text("hi".to_string()))
        );
        assert_eq!(parse_envelope(&json!({"type": "text", "text": "  "})), None);
        assert_eq!(parse_envelope(&json!({"type": "tool-calls", "calls": []})), None);
        assert_eq!(parse_envelope(&json!({"answer": 42})), None);
    }

    #[test]
    fn test_nothing_recovered() {
        assert_eq!(recover_routed_output(&RecoveryInputs::default()), None);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_failed_result_with_tool_calls_is_downgraded() {
        let outcome = resolve_tool_routing(
            Some(RecoveredOutput::ToolCalls(vec![call("toolu_1", "bash", r#"{"command":"ls"}"#)])),
            Some(&result("error_max_turns")),
            Some("tool_use"),
        );
        assert_eq!(
            outcome.finish_reason,
            FinishReason::new(UnifiedFinishReason::ToolCalls, "tool_use")
        );
        assert_eq!(
            outcome.content,
            vec![Content::ToolCall {
                tool_call_id: "toolu_1".to_string(),
                tool_name: "bash".to_string(),
                input: r#"{"command":"ls"}"#.to_string(),
                provider_executed: false,
            }]
        );
    }

    #[test]
    fn test_empty_success_is_explicit_error() {
        let outcome = resolve_tool_routing(None, Some(&result("success")), Some("end_turn"));
        assert_eq!(
            outcome.finish_reason,
            FinishReason::new(UnifiedFinishReason::Error, EMPTY_TOOL_ROUTING_OUTPUT)
        );
        assert!(matches!(&outcome.content[..], [Content::Error { .. }]));
    }

    #[test]
    fn test_unrecovered_failure_carries_subtype_and_errors() {
        let mut failed = result(STRUCTURED_OUTPUT_EXHAUSTED);
        failed.errors = vec!["schema mismatch".to_string(), "retry limit".to_string()];

        let outcome = resolve_tool_routing(None, Some(&failed), None);
        assert_eq!(
            outcome.finish_reason,
            FinishReason::new(UnifiedFinishReason::Error, STRUCTURED_OUTPUT_EXHAUSTED)
        );
        assert_eq!(
            outcome.content,
            vec![Content::Error {
                error: "schema mismatch; retry limit".to_string()
            }]
        );
    }

    #[test]
    fn test_text_finish_downgrade_only_for_structured_output_exhaustion() {
        let exhausted = result(STRUCTURED_OUTPUT_EXHAUSTED);
        assert_eq!(
            resolve_text_finish(true, Some(&exhausted), Some("end_turn")).unified,
            UnifiedFinishReason::Stop
        );
        assert_eq!(
            resolve_text_finish(false, Some(&exhausted), None).unified,
            UnifiedFinishReason::Error
        );

        let max_turns = result("error_max_turns");
        assert_eq!(
            resolve_text_finish(true, Some(&max_turns), None),
            FinishReason::new(UnifiedFinishReason::Error, "error_max_turns")
        );

        assert_eq!(
            resolve_text_finish(true, Some(&result("success")), Some("max_tokens")).unified,
            UnifiedFinishReason::Length
        );
    }
}
