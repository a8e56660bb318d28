//! Session continuity: deciding whether to resume and what to send
//!
//! The runtime accepts one prompt per invocation but keeps its own conversation
//! memory per session. Given the current conversation, the matcher picks a
//! remembered session to resume and renders only the messages that session has
//! not seen yet.
//!
//! Two paths exist:
//!
//! - The incoming-key fast path, for callers that name their conversation. A
//!   single user message always resumes the bound session. A longer conversation
//!   resumes only if the remembered first/last fingerprints still line up.
//! - The fingerprint-prefix path, which resumes the session whose remembered
//!   fingerprints are the longest prefix of the current sequence.
//!
//! Whenever a resumed delta renders to nothing, the full prompt is sent without
//! a resume hint. The runtime never receives an empty delta.

use crate::prompt::Message;
use crate::prompt_serializer::{non_system_messages, render_prompt_text, RenderMode, SerializedPrompt};
use crate::session_store::{IncomingSessionState, PromptSessionState};

/// How the prompt for this turn was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityKind {
    /// Full conversation, no resume
    Fresh,
    /// Resumed through the longest matching fingerprint prefix
    PrefixMatch,
    /// Resumed through a caller-supplied conversation key
    IncomingKey,
}

/// Prompt and resume hint for one runtime invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptQueryInput {
    pub prompt: String,
    pub resume_session_id: Option<String>,
    pub kind: ContinuityKind,
}

impl PromptQueryInput {
    fn fresh(messages: &[Message]) -> Self {
        Self {
            prompt: render_prompt_text(non_system_messages(messages), RenderMode::Full),
            resume_session_id: None,
            kind: ContinuityKind::Fresh,
        }
    }

    pub fn is_resume(&self) -> bool {
        self.resume_session_id.is_some()
    }
}

/// Decide the prompt for this turn, trying the incoming-key fast path first
pub fn plan_query(
    messages: &[Message],
    serialized: &SerializedPrompt,
    prompt_states: &[PromptSessionState],
    incoming_state: Option<&IncomingSessionState>,
) -> PromptQueryInput {
    if let Some(state) = incoming_state {
        if let Some(input) = build_incoming_query_input(messages, serialized, state) {
            tracing::debug!(
                "Resuming session {} via incoming key '{}'",
                state.session_id,
                state.incoming_session_key
            );
            return input;
        }
        tracing::debug!(
            "Incoming key '{}' did not line up with the conversation, trying prefix match",
            state.incoming_session_key
        );
    }

    build_prompt_query_input(messages, serialized, prompt_states)
}

/// Resume the session with the longest matching fingerprint prefix, if any
pub fn build_prompt_query_input(
    messages: &[Message],
    serialized: &SerializedPrompt,
    prompt_states: &[PromptSessionState],
) -> PromptQueryInput {
    let Some(state) = find_longest_prefix_match(&serialized.messages, prompt_states) else {
        tracing::debug!("No remembered session matches this conversation");
        return PromptQueryInput::fresh(messages);
    };

    let matched = state.serialized_prompt_messages.len();
    if serialized.len() <= matched {
        tracing::debug!(
            "Session {} already covers all {} messages, sending full prompt",
            state.session_id,
            serialized.len()
        );
        return PromptQueryInput::fresh(messages);
    }

    match render_delta(messages, matched) {
        Some(prompt) => {
            tracing::debug!(
                "Resuming session {} after {} of {} messages",
                state.session_id,
                matched,
                serialized.len()
            );
            PromptQueryInput {
                prompt,
                resume_session_id: Some(state.session_id.clone()),
                kind: ContinuityKind::PrefixMatch,
            }
        }
        None => {
            tracing::debug!(
                "Delta for session {} rendered empty, sending full prompt",
                state.session_id
            );
            PromptQueryInput::fresh(messages)
        }
    }
}

/// The state whose fingerprints are the longest exact prefix of `fingerprints`
///
/// States with no fingerprints never match. Ties go to the most recent state.
pub fn find_longest_prefix_match<'a>(
    fingerprints: &[String],
    prompt_states: &'a [PromptSessionState],
) -> Option<&'a PromptSessionState> {
    prompt_states
        .iter()
        .filter(|state| {
            let prefix = &state.serialized_prompt_messages;
            !prefix.is_empty() && fingerprints.starts_with(prefix)
        })
        .fold(None, |best: Option<&PromptSessionState>, state| match best {
            Some(current)
                if current.serialized_prompt_messages.len()
                    >= state.serialized_prompt_messages.len() =>
            {
                Some(current)
            }
            _ => Some(state),
        })
}

/// Fast path for a caller-supplied conversation key
///
/// Returns `None` when the fast path does not apply, in which case the caller
/// falls back to [`build_prompt_query_input`].
pub fn build_incoming_query_input(
    messages: &[Message],
    serialized: &SerializedPrompt,
    state: &IncomingSessionState,
) -> Option<PromptQueryInput> {
    let conversation: Vec<&Message> = non_system_messages(messages).collect();

    let delta_start = if conversation.len() == 1 && conversation[0].is_user() {
        0
    } else {
        let remembered = state.prompt_message_count;
        if remembered == 0 || serialized.len() <= remembered {
            return None;
        }
        let first_matches = state.first_prompt_message_signature.as_deref() == serialized.first();
        let last_matches = state.last_prompt_message_signature.as_deref()
            == serialized.messages.get(remembered - 1).map(String::as_str);
        if !(first_matches && last_matches) {
            return None;
        }
        remembered
    };

    let prompt = render_prompt_text(conversation[delta_start..].iter().copied(), RenderMode::Resume);
    if prompt.trim().is_empty() {
        return None;
    }

    Some(PromptQueryInput {
        prompt,
        resume_session_id: Some(state.session_id.clone()),
        kind: ContinuityKind::IncomingKey,
    })
}

/// Resume-mode rendering of the non-system messages after `matched`
fn render_delta(messages: &[Message], matched: usize) -> Option<String> {
    let prompt = render_prompt_text(non_system_messages(messages).skip(matched), RenderMode::Resume);
    if prompt.trim().is_empty() {
        None
    } else {
        Some(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ContentPart;
    use crate::prompt_serializer::serialize_prompt;
    use serde_json::json;

    fn remembered(session_id: &str, messages: &[Message]) -> PromptSessionState {
        PromptSessionState::new(session_id, serialize_prompt(messages).messages)
    }

    #[test]
    fn test_resumes_with_only_new_messages() {
        let states = vec![remembered("s1", &[Message::user("안녕")])];
        let messages = vec![
            Message::user("안녕"),
            Message::assistant("ans"),
            Message::user("다음"),
        ];
        let serialized = serialize_prompt(&messages);

        let input = build_prompt_query_input(&messages, &serialized, &states);
        assert_eq!(input.resume_session_id.as_deref(), Some("s1"));
        assert_eq!(input.prompt, "다음");
        assert_eq!(input.kind, ContinuityKind::PrefixMatch);
    }

    #[test]
    fn test_no_match_sends_full_prompt() {
        let states = vec![remembered("s1", &[Message::user("other")])];
        let messages = vec![Message::system("rules"), Message::user("hi"), Message::assistant("yo")];
        let serialized = serialize_prompt(&messages);

        let input = build_prompt_query_input(&messages, &serialized, &states);
        assert_eq!(input.resume_session_id, None);
        assert_eq!(input.prompt, "hi\n\n[assistant]\nyo");
        assert!(!input.prompt.contains("rules"));
    }

    #[test]
    fn test_longest_prefix_wins() {
        let short = remembered("short", &[Message::user("a")]);
        let long = remembered("long", &[Message::user("a"), Message::assistant("b")]);
        let messages = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        let serialized = serialize_prompt(&messages);

        let states = vec![short, long];
        let matched = find_longest_prefix_match(&serialized.messages, &states).unwrap();
        assert_eq!(matched.session_id, "long");

        let input = build_prompt_query_input(&messages, &serialized, &states);
        assert_eq!(input.prompt, "c");
    }

    #[test]
    fn test_equal_length_match_is_not_resumed() {
        let messages = vec![Message::user("a")];
        let states = vec![remembered("s1", &messages)];
        let serialized = serialize_prompt(&messages);

        let input = build_prompt_query_input(&messages, &serialized, &states);
        assert_eq!(input.resume_session_id, None);
        assert_eq!(input.prompt, "a");
    }

    #[test]
    fn test_empty_delta_falls_back_to_full_prompt() {
        let messages = vec![Message::user("a"), Message::assistant("only text")];
        let states = vec![remembered("s1", &[Message::user("a")])];
        let serialized = serialize_prompt(&messages);

        let input = build_prompt_query_input(&messages, &serialized, &states);
        assert_eq!(input.resume_session_id, None);
        assert_eq!(input.prompt, "a\n\n[assistant]\nonly text");
    }

    #[test]
    fn test_delta_keeps_tool_calls_and_results() {
        let prior = vec![Message::user("list files")];
        let messages = vec![
            Message::user("list files"),
            Message::Assistant {
                content: vec![ContentPart::ToolCall {
                    tool_call_id: "toolu_1".to_string(),
                    tool_name: "bash".to_string(),
                    input: json!({"command": "ls"}),
                }],
            },
            Message::Tool {
                content: vec![ContentPart::ToolResult {
                    tool_call_id: "toolu_1".to_string(),
                    tool_name: "bash".to_string(),
                    output: json!("a.txt"),
                }],
            },
        ];
        let serialized = serialize_prompt(&messages);

        let input = build_prompt_query_input(&messages, &serialized, &[remembered("s1", &prior)]);
        assert_eq!(input.resume_session_id.as_deref(), Some("s1"));
        assert!(input.prompt.contains("[tool-call:bash#toolu_1]"));
        assert!(input.prompt.contains("[tool-result:bash#toolu_1] \"a.txt\""));
    }

    #[test]
    fn test_single_user_message_always_resumes_known_key() {
        let state = IncomingSessionState::from_fingerprints(
            "chat-1",
            "sess-1",
            &["old".to_string(), "[assistant]\nreply".to_string()],
        );

        for text in ["hello", "something else entirely"] {
            let messages = vec![Message::user(text)];
            let serialized = serialize_prompt(&messages);
            let input = build_incoming_query_input(&messages, &serialized, &state).unwrap();
            assert_eq!(input.resume_session_id.as_deref(), Some("sess-1"));
            assert_eq!(input.prompt, text);
            assert_eq!(input.kind, ContinuityKind::IncomingKey);
        }
    }

    #[test]
    fn test_incoming_key_with_appended_history_sends_delta() {
        let prior = vec![Message::user("a"), Message::assistant("b")];
        let state = IncomingSessionState::from_fingerprints(
            "chat-1",
            "sess-1",
            &serialize_prompt(&prior).messages,
        );
        let messages = vec![Message::user("a"), Message::assistant("b"), Message::user("c")];
        let serialized = serialize_prompt(&messages);

        let input = build_incoming_query_input(&messages, &serialized, &state).unwrap();
        assert_eq!(input.prompt, "c");
        assert_eq!(input.resume_session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn test_incoming_key_reused_for_divergent_conversation_is_rejected() {
        let state = IncomingSessionState::from_fingerprints(
            "chat-1",
            "sess-1",
            &["a".to_string(), "[assistant]\nb".to_string()],
        );
        let messages = vec![Message::user("x"), Message::assistant("b"), Message::user("c")];
        let serialized = serialize_prompt(&messages);

        assert!(build_incoming_query_input(&messages, &serialized, &state).is_none());

        let input = plan_query(&messages, &serialized, &[], Some(&state));
        assert_eq!(input.kind, ContinuityKind::Fresh);
        assert_eq!(input.resume_session_id, None);
    }

    #[test]
    fn test_plan_query_falls_back_to_prefix_match() {
        let state = IncomingSessionState::from_fingerprints("chat-1", "sess-x", &["zzz".to_string()]);
        let states = vec![remembered("s1", &[Message::user("a")])];
        let messages = vec![Message::user("a"), Message::user("b")];
        let serialized = serialize_prompt(&messages);

        let input = plan_query(&messages, &serialized, &states, Some(&state));
        assert_eq!(input.resume_session_id.as_deref(), Some("s1"));
        assert_eq!(input.kind, ContinuityKind::PrefixMatch);
    }
}
