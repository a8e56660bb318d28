//! Discovery of a caller-supplied conversation key
//!
//! Callers identify a logical conversation in several historical ways. Sources
//! are consulted in priority order and the first non-empty value wins:
//!
//! 1. the `x-session-key` request header (case-insensitive name)
//! 2. telemetry metadata
//! 3. the canonical provider-options namespace
//! 4. legacy provider-options namespaces
//! 5. any other provider-options namespace
//!
//! Within a metadata object the recognized field names are tried in
//! [`SESSION_KEY_FIELDS`] order.

use crate::constants::names::PROVIDER_NAMESPACE;
use crate::prompt::CallOptions;
use serde_json::{Map, Value};

/// Request header carrying the conversation key
pub const SESSION_KEY_HEADER: &str = "x-session-key";

/// Field names recognized inside metadata objects
pub const SESSION_KEY_FIELDS: [&str; 4] =
    ["incomingSessionKey", "sessionKey", "conversationId", "threadId"];

/// Namespaces used by older callers
pub const LEGACY_NAMESPACES: [&str; 3] = ["claudeCode", "claude-code", "claude_code"];

/// Where a conversation key was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKeySource {
    Header,
    Telemetry,
    Namespace(String),
}

/// Resolve the conversation key for this call, if any
pub fn resolve_incoming_session_key(options: &CallOptions) -> Option<String> {
    resolve_with_source(options).map(|(key, _)| key)
}

/// Resolve the conversation key together with the source it came from
pub fn resolve_with_source(options: &CallOptions) -> Option<(String, SessionKeySource)> {
    if let Some(key) = options
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(SESSION_KEY_HEADER))
        .and_then(|(_, value)| non_empty(value))
    {
        return Some((key, SessionKeySource::Header));
    }

    if let Some(key) = key_from_object(&options.telemetry_metadata) {
        return Some((key, SessionKeySource::Telemetry));
    }

    let known: Vec<&str> = std::iter::once(PROVIDER_NAMESPACE)
        .chain(LEGACY_NAMESPACES)
        .collect();

    for namespace in &known {
        if let Some(key) = key_from_namespace(&options.provider_options, namespace) {
            return Some((key, SessionKeySource::Namespace(namespace.to_string())));
        }
    }

    options
        .provider_options
        .iter()
        .filter(|(namespace, _)| !known.contains(&namespace.as_str()))
        .find_map(|(namespace, value)| {
            value
                .as_object()
                .and_then(key_from_object)
                .map(|key| (key, SessionKeySource::Namespace(namespace.clone())))
        })
}

fn key_from_namespace(provider_options: &Map<String, Value>, namespace: &str) -> Option<String> {
    provider_options
        .get(namespace)
        .and_then(Value::as_object)
        .and_then(key_from_object)
}

fn key_from_object(object: &Map<String, Value>) -> Option<String> {
    SESSION_KEY_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(value_as_key))
}

fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
