//! Builders for recorded stream-json lines

use serde_json::{json, Value};

fn stream_event(session_id: &str, event: Value) -> String {
    json!({
        "type": "stream_event",
        "session_id": session_id,
        "parent_tool_use_id": null,
        "event": event,
    })
    .to_string()
}

pub fn init(session_id: &str) -> String {
    json!({
        "type": "system",
        "subtype": "init",
        "session_id": session_id,
        "model": "claude-test",
        "tools": [],
    })
    .to_string()
}

pub fn message_start(session_id: &str, message_id: &str) -> String {
    stream_event(
        session_id,
        json!({
            "type": "message_start",
            "message": {
                "id": message_id,
                "model": "claude-test",
                "usage": {"input_tokens": 12, "output_tokens": 1}
            }
        }),
    )
}

pub fn text_start(session_id: &str, index: usize) -> String {
    stream_event(
        session_id,
        json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "text", "text": ""}
        }),
    )
}

pub fn text_delta(session_id: &str, index: usize, text: &str) -> String {
    stream_event(
        session_id,
        json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "text_delta", "text": text}
        }),
    )
}

pub fn thinking_start(session_id: &str, index: usize) -> String {
    stream_event(
        session_id,
        json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "thinking", "thinking": ""}
        }),
    )
}

pub fn thinking_delta(session_id: &str, index: usize, thinking: &str) -> String {
    stream_event(
        session_id,
        json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "thinking_delta", "thinking": thinking}
        }),
    )
}

pub fn tool_use_start(session_id: &str, index: usize, id: &str, name: &str) -> String {
    stream_event(
        session_id,
        json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}
        }),
    )
}

pub fn input_json_delta(session_id: &str, index: usize, fragment: &str) -> String {
    stream_event(
        session_id,
        json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "input_json_delta", "partial_json": fragment}
        }),
    )
}

pub fn block_stop(session_id: &str, index: usize) -> String {
    stream_event(
        session_id,
        json!({"type": "content_block_stop", "index": index}),
    )
}

pub fn message_delta(session_id: &str, stop_reason: &str) -> String {
    stream_event(
        session_id,
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason},
            "usage": {"output_tokens": 7}
        }),
    )
}

pub fn message_stop(session_id: &str) -> String {
    stream_event(session_id, json!({"type": "message_stop"}))
}

pub fn assistant_text(session_id: &str, text: &str) -> String {
    json!({
        "type": "assistant",
        "session_id": session_id,
        "parent_tool_use_id": null,
        "message": {
            "id": "msg_assistant",
            "model": "claude-test",
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn"
        }
    })
    .to_string()
}

pub fn assistant_tool_use(session_id: &str, id: &str, name: &str, input: Value) -> String {
    json!({
        "type": "assistant",
        "session_id": session_id,
        "parent_tool_use_id": null,
        "message": {
            "id": "msg_assistant",
            "model": "claude-test",
            "content": [{"type": "tool_use", "id": id, "name": name, "input": input}],
            "stop_reason": "tool_use"
        }
    })
    .to_string()
}

pub fn result_success(session_id: &str, text: &str) -> String {
    json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": text,
        "session_id": session_id,
        "total_cost_usd": 0.002,
        "duration_ms": 900,
        "num_turns": 1,
        "usage": {
            "input_tokens": 12,
            "output_tokens": 7,
            "cache_read_input_tokens": 100,
            "cache_creation_input_tokens": 3
        }
    })
    .to_string()
}

pub fn result_structured(session_id: &str, structured_output: Value) -> String {
    json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": "",
        "structured_output": structured_output,
        "session_id": session_id,
    })
    .to_string()
}

pub fn result_error(session_id: &str, subtype: &str) -> String {
    json!({
        "type": "result",
        "subtype": subtype,
        "is_error": true,
        "session_id": session_id,
        "errors": [],
    })
    .to_string()
}

/// Complete single-text-block turn: init, partial events, assistant, result
pub fn text_turn(session_id: &str, text: &str) -> Vec<String> {
    vec![
        init(session_id),
        message_start(session_id, "msg_1"),
        text_start(session_id, 0),
        text_delta(session_id, 0, text),
        block_stop(session_id, 0),
        message_delta(session_id, "end_turn"),
        message_stop(session_id),
        assistant_text(session_id, text),
        result_success(session_id, text),
    ]
}
