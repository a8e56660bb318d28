//! Warnings for call settings the runtime cannot honor
//!
//! These are degraded-but-non-fatal conditions: the call proceeds and the
//! warnings ride along on the result or the `stream-start` part.

use crate::prompt::{CallOptions, ResponseFormat, ToolChoice, ToolDefinition};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Warning {
    UnsupportedSetting {
        setting: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    UnsupportedTool {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Other {
        message: String,
    },
}

impl Warning {
    fn setting(name: &str) -> Self {
        Warning::UnsupportedSetting {
            setting: name.to_string(),
            details: None,
        }
    }
}

/// Collect warnings for every knob in `options` the runtime ignores
pub fn collect_warnings(options: &CallOptions) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let numeric_knobs: [(&str, bool); 7] = [
        ("temperature", options.temperature.is_some()),
        ("topP", options.top_p.is_some()),
        ("topK", options.top_k.is_some()),
        ("presencePenalty", options.presence_penalty.is_some()),
        ("frequencyPenalty", options.frequency_penalty.is_some()),
        ("seed", options.seed.is_some()),
        ("maxOutputTokens", options.max_output_tokens.is_some()),
    ];
    for (name, present) in numeric_knobs {
        if present {
            warnings.push(Warning::setting(name));
        }
    }

    if !options.stop_sequences.is_empty() {
        warnings.push(Warning::setting("stopSequences"));
    }

    for tool in &options.tools {
        if let ToolDefinition::ProviderDefined { id, name } = tool {
            warnings.push(Warning::UnsupportedTool {
                tool_name: name.clone(),
                details: Some(format!("provider-defined tool '{}' is not bridged", id)),
            });
        }
    }

    match &options.tool_choice {
        Some(ToolChoice::Required) => warnings.push(Warning::UnsupportedSetting {
            setting: "toolChoice".to_string(),
            details: Some("'required' is treated as 'auto'".to_string()),
        }),
        Some(ToolChoice::Tool { tool_name }) => warnings.push(Warning::UnsupportedSetting {
            setting: "toolChoice".to_string(),
            details: Some(format!(
                "forcing tool '{}' is not supported, treated as 'auto'",
                tool_name
            )),
        }),
        _ => {}
    }

    if let Some(ResponseFormat::Json { schema: None }) = &options.response_format {
        warnings.push(Warning::Other {
            message: "JSON response format without a schema is treated as plain text".to_string(),
        });
    }

    warnings
}
