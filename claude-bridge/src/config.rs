//! Configuration types for the Claude bridge

use crate::constants::sizes;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use typed_builder::TypedBuilder;

/// Environment variable carrying an API key
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";
/// Environment variable carrying an OAuth/bearer token
pub const ENV_AUTH_TOKEN: &str = "ANTHROPIC_AUTH_TOKEN";
/// Environment variable overriding the API base URL
pub const ENV_BASE_URL: &str = "ANTHROPIC_BASE_URL";
/// Environment variable overriding the CLI executable
pub const ENV_CLI_PATH: &str = "CLAUDE_BRIDGE_CLI_PATH";
/// Environment variable the CLI reads for its thinking budget
pub const ENV_MAX_THINKING_TOKENS: &str = "MAX_THINKING_TOKENS";

fn default_model_id() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_cli_path() -> PathBuf {
    PathBuf::from("claude")
}

/// Default value for prompt_session_capacity
fn default_prompt_session_capacity() -> usize {
    sizes::sessions::PROMPT_SESSION_CAPACITY
}

/// Default value for incoming_session_capacity
fn default_incoming_session_capacity() -> usize {
    sizes::sessions::INCOMING_SESSION_CAPACITY
}

/// `<user cache dir>/claude-bridge/sessions`, when the platform has one
fn default_session_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("claude-bridge").join("sessions"))
}

fn default_persist_sessions() -> bool {
    true
}

/// Permission mode passed through to the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

/// Reasoning effort hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
        }
    }
}

/// Settings for one bridge model instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct BridgeSettings {
    /// Model id passed to the runtime
    #[serde(default = "default_model_id")]
    #[builder(default = default_model_id(), setter(into))]
    pub model_id: String,
    /// Path to the `claude` executable
    #[serde(default = "default_cli_path")]
    #[builder(default = default_cli_path(), setter(into))]
    pub cli_path: PathBuf,
    /// Working directory for the runtime process
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub cwd: Option<PathBuf>,
    /// Mutually exclusive with `auth_token`
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub api_key: Option<String>,
    /// Mutually exclusive with `api_key`
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub auth_token: Option<String>,
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub base_url: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub permission_mode: PermissionMode,
    /// Turn limit in native tool execution mode; tool routing always uses one turn
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub max_turns: Option<u32>,
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub max_thinking_tokens: Option<u32>,
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub effort: Option<Effort>,
    /// Maximum number of remembered prompt sessions (default: 32)
    #[serde(default = "default_prompt_session_capacity")]
    #[builder(default = default_prompt_session_capacity())]
    pub prompt_session_capacity: usize,
    /// Maximum number of remembered incoming session keys (default: 256)
    #[serde(default = "default_incoming_session_capacity")]
    #[builder(default = default_incoming_session_capacity())]
    pub incoming_session_capacity: usize,
    /// Root of the durable session cache; `None` disables the file cache
    #[serde(default = "default_session_cache_dir")]
    #[builder(default = default_session_cache_dir())]
    pub session_cache_dir: Option<PathBuf>,
    #[serde(default = "default_persist_sessions")]
    #[builder(default = default_persist_sessions())]
    pub persist_sessions: bool,
    /// Extra environment variables for the runtime process
    #[serde(default)]
    #[builder(default)]
    pub env: HashMap<String, String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BridgeSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(BridgeError::Config("model_id cannot be empty".to_string()));
        }

        if self.api_key.is_some() && self.auth_token.is_some() {
            return Err(BridgeError::Config(
                "api_key and auth_token are mutually exclusive".to_string(),
            ));
        }

        if self.prompt_session_capacity == 0 {
            return Err(BridgeError::Config(
                "prompt_session_capacity must be greater than 0".to_string(),
            ));
        }

        if self.incoming_session_capacity == 0 {
            return Err(BridgeError::Config(
                "incoming_session_capacity must be greater than 0".to_string(),
            ));
        }

        if matches!(self.max_turns, Some(0)) {
            return Err(BridgeError::Config(
                "max_turns must be greater than 0".to_string(),
            ));
        }

        if let Some(base_url) = &self.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(BridgeError::Config(format!(
                    "base_url must start with http:// or https://: {}",
                    base_url
                )));
            }
        }

        Ok(())
    }

    /// Default settings for `model_id` with overrides from the process environment
    pub fn from_env(model_id: impl Into<String>) -> Self {
        Self::from_env_with(model_id, |name| std::env::var(name).ok())
    }

    /// Default settings for `model_id` with overrides from `lookup`
    pub fn from_env_with(
        model_id: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let mut settings = Self::builder().model_id(model_id).build();
        settings.api_key = non_empty(ENV_API_KEY);
        settings.auth_token = non_empty(ENV_AUTH_TOKEN);
        settings.base_url = non_empty(ENV_BASE_URL);
        if let Some(cli_path) = non_empty(ENV_CLI_PATH) {
            settings.cli_path = PathBuf::from(cli_path);
        }
        settings
    }

    /// Environment overrides handed to the runtime for each invocation
    ///
    /// An explicit auth token blanks out any inherited API key so the runtime
    /// cannot pick up both.
    pub fn runtime_env(&self) -> HashMap<String, String> {
        let mut env = self.env.clone();
        if let Some(api_key) = &self.api_key {
            env.insert(ENV_API_KEY.to_string(), api_key.clone());
        }
        if let Some(auth_token) = &self.auth_token {
            env.insert(ENV_AUTH_TOKEN.to_string(), auth_token.clone());
            env.insert(ENV_API_KEY.to_string(), String::new());
        }
        if let Some(base_url) = &self.base_url {
            env.insert(ENV_BASE_URL.to_string(), base_url.clone());
        }
        if let Some(tokens) = self.max_thinking_tokens {
            env.insert(ENV_MAX_THINKING_TOKENS.to_string(), tokens.to_string());
        }
        env
    }

    /// Load settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: BridgeSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
