//! Deterministic rendering of a conversation into per-message fingerprints
//!
//! Every non-system message renders to exactly one fingerprint string so that
//! fingerprint sequences line up positionally with the caller's messages. System
//! messages are pulled out into a separate system prompt.
//!
//! Two modes exist:
//!
//! - [`RenderMode::Full`] renders every message. It is used both for
//!   fingerprints and for prompts sent without a resume hint.
//! - [`RenderMode::Resume`] additionally drops assistant messages that carry no
//!   tool call, because a resumed runtime session already holds that text.

use crate::prompt::{ContentPart, Message};

/// Rendering mode for prompt text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Full,
    Resume,
}

/// A conversation split into its system prompt and fingerprints
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedPrompt {
    /// System messages joined by a blank line, if any were present
    pub system_prompt: Option<String>,
    /// One fingerprint per non-system message, in order
    pub messages: Vec<String>,
}

impl SerializedPrompt {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.messages.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }
}

/// Split `messages` into system prompt and per-message fingerprints
pub fn serialize_prompt(messages: &[Message]) -> SerializedPrompt {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter_map(|message| match message {
            Message::System { content } if !content.trim().is_empty() => Some(content.as_str()),
            _ => None,
        })
        .collect();

    let system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let fingerprints = non_system_messages(messages)
        .map(render_fingerprint)
        .collect();

    SerializedPrompt {
        system_prompt,
        messages: fingerprints,
    }
}

/// Non-system messages in conversation order
pub fn non_system_messages(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages.iter().filter(|message| !message.is_system())
}

/// Render one message as its fingerprint
pub fn render_fingerprint(message: &Message) -> String {
    let body = render_parts(message.parts());
    if message.is_user() {
        body
    } else {
        format!("[{}]\n{}", message.role(), body)
    }
}

/// Render a single message for a prompt, or `None` if the mode drops it
pub fn render_message(message: &Message, mode: RenderMode) -> Option<String> {
    if message.is_system() {
        return None;
    }
    if mode == RenderMode::Resume
        && matches!(message, Message::Assistant { .. })
        && !message.has_tool_call()
    {
        return None;
    }
    if render_parts(message.parts()).is_empty() {
        return None;
    }
    Some(render_fingerprint(message))
}

/// Render a run of messages as prompt text, skipping anything that renders empty
pub fn render_prompt_text<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    mode: RenderMode,
) -> String {
    messages
        .into_iter()
        .filter_map(|message| render_message(message, mode))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_parts(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .map(render_part)
        .filter(|rendered| !rendered.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_part(part: &ContentPart) -> String {
    match part {
        ContentPart::Text { text } => text.clone(),
        ContentPart::File { media_type, .. } => {
            if media_type.starts_with("image/") {
                format!("[image:{}]", media_type)
            } else {
                format!("[file:{}]", media_type)
            }
        }
        ContentPart::Reasoning { .. } => String::new(),
        ContentPart::ToolCall {
            tool_call_id,
            tool_name,
            input,
        } => format!("[tool-call:{}#{}] {}", tool_name, tool_call_id, input),
        ContentPart::ToolResult {
            tool_call_id,
            tool_name,
            output,
        } => format!("[tool-result:{}#{}] {}", tool_name, tool_call_id, output),
    }
}
