//! Runtime adapter driving the `claude` CLI in stream-json mode
//!
//! Each query spawns one CLI process. The prompt is written to stdin, stdout is
//! read line by line and parsed into [`RawMessage`]s. When the query carries a
//! tool bridge, a [`crate::bridge_server`] instance is started for the lifetime of
//! the stream and registered with the CLI through `--mcp-config`.

use crate::bridge_server::{start_bridge_server, BridgeServerHandle};
use crate::config::BridgeSettings;
use crate::constants::names::CLI_BRIDGE_TOOL_QUALIFIER;
use crate::constants::sizes::logging::MAX_LOGGED_LINE_CHARS;
use crate::error::{BridgeError, Result};
use crate::raw_messages::{parse_line, RawMessage};
use crate::runtime::{AgentRuntime, RawMessageStream, RuntimeOptions, RuntimeQuery};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runtime backed by the `claude` executable
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    cli_path: PathBuf,
}

impl ClaudeCliRuntime {
    pub fn new(cli_path: impl Into<PathBuf>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self::new(settings.cli_path.clone())
    }

    pub fn cli_path(&self) -> &PathBuf {
        &self.cli_path
    }

    /// Command-line arguments for one invocation
    ///
    /// `mcp_config` is the JSON document registering the bridge server, if any.
    pub fn build_args(options: &RuntimeOptions, mcp_config: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--print".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
        ];
        if options.include_partial_messages {
            args.push("--include-partial-messages".into());
        }
        if !options.model_id.is_empty() {
            args.push("--model".into());
            args.push(options.model_id.clone());
        }
        if let Some(session_id) = &options.resume_session_id {
            args.push("--resume".into());
            args.push(session_id.clone());
        }
        if let Some(system_prompt) = &options.system_prompt {
            args.push("--system-prompt".into());
            args.push(system_prompt.clone());
        }
        if let Some(max_turns) = options.max_turns {
            args.push("--max-turns".into());
            args.push(max_turns.to_string());
        }
        args.push("--permission-mode".into());
        args.push(options.permission_mode.as_str().into());

        if options.disallow_builtin_tools {
            args.push("--tools".into());
            args.push(String::new());
        }
        if !options.allowed_tools.is_empty() {
            let allowed: Vec<String> = options
                .allowed_tools
                .iter()
                .map(|name| format!("{}{}", CLI_BRIDGE_TOOL_QUALIFIER, name))
                .collect();
            args.push("--allowedTools".into());
            args.push(allowed.join(","));
        }
        if let Some(config) = mcp_config {
            args.push("--mcp-config".into());
            args.push(config.to_string());
            args.push("--strict-mcp-config".into());
        }
        if let Some(schema) = &options.output_schema {
            args.push("--json-schema".into());
            args.push(schema.to_string());
        }
        if let Some(effort) = options.effort {
            args.push("--effort".into());
            args.push(effort.as_str().into());
        }
        args
    }

    fn command(&self, options: &RuntimeOptions, args: &[String]) -> Command {
        let mut command = Command::new(&self.cli_path);
        command.args(args);
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        for (name, value) in &options.env {
            command.env(name, value);
        }
        if let Some(tokens) = options.max_thinking_tokens {
            command.env(
                crate::config::ENV_MAX_THINKING_TOKENS,
                tokens.to_string(),
            );
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Map the CLI's qualified MCP tool name back into the bridge namespace
pub fn strip_cli_qualifier(name: &str) -> Option<String> {
    name.strip_prefix(CLI_BRIDGE_TOOL_QUALIFIER)
        .map(str::to_string)
}

#[async_trait]
impl AgentRuntime for ClaudeCliRuntime {
    async fn query(&self, query: RuntimeQuery) -> Result<RawMessageStream> {
        let RuntimeQuery { prompt, options } = query;

        let server = match &options.tool_bridge {
            Some(bridge) => Some(start_bridge_server(bridge.clone()).await?),
            None => None,
        };
        let mcp_config = server.as_ref().map(BridgeServerHandle::mcp_config_json);
        let args = Self::build_args(&options, mcp_config.as_deref());

        tracing::info!(
            "Spawning {} (resume={:?}, bridged tools={})",
            self.cli_path.display(),
            options.resume_session_id,
            options.allowed_tools.len()
        );
        let mut child = self.command(&options, &args).spawn().map_err(|e| {
            BridgeError::Runtime(format!(
                "Failed to spawn {}: {}",
                self.cli_path.display(),
                e
            ))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Runtime("CLI stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Runtime("CLI stdout not captured".to_string()))?;
        let stderr = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut collected = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("claude stderr: {}", line);
                    collected.push(line);
                }
                collected.join("\n")
            })
        });

        stdin.write_all(prompt.as_bytes()).await?;
        stdin.flush().await?;
        drop(stdin);

        let state = CliStream {
            lines: BufReader::new(stdout).lines(),
            child,
            stderr,
            cancel: options.cancel.clone(),
            saw_result: false,
            done: false,
            _server: server,
        };

        Ok(stream::unfold(state, |mut state| async move {
            let item = state.next_message().await?;
            Some((item, state))
        })
        .boxed())
    }
}

/// Per-invocation process state; dropping it kills the child and stops the server
struct CliStream {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    cancel: CancellationToken,
    saw_result: bool,
    done: bool,
    _server: Option<BridgeServerHandle>,
}

impl CliStream {
    async fn next_message(&mut self) -> Option<Result<RawMessage>> {
        while !self.done {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => None,
                line = self.lines.next_line() => Some(line),
            };
            let Some(line) = line else {
                tracing::debug!("CLI invocation cancelled, killing process");
                self.done = true;
                let _ = self.child.kill().await;
                return None;
            };

            match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(mut message)) => {
                        message.rename_tools(strip_cli_qualifier);
                        if matches!(message, RawMessage::Result(_)) {
                            self.saw_result = true;
                        }
                        return Some(Ok(message));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(
                            "Unparseable CLI line: {}",
                            truncate(&line)
                        );
                        return Some(Err(e));
                    }
                },
                Ok(None) => {
                    self.done = true;
                    return self.finish().await.err().map(Err);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }

    /// Reap the process once stdout closes
    async fn finish(&mut self) -> Result<()> {
        let status = self.child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        tracing::debug!("CLI exited with {}", status);

        if status.success() || self.saw_result {
            return Ok(());
        }
        Err(BridgeError::Runtime(format!(
            "CLI exited with {} before producing a result: {}",
            status,
            truncate(&stderr)
        )))
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_LOGGED_LINE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Effort, PermissionMode};
    use serde_json::json;

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_minimal_args() {
        let options = RuntimeOptions {
            model_id: "claude-sonnet-4-20250514".to_string(),
            include_partial_messages: true,
            ..Default::default()
        };
        let args = ClaudeCliRuntime::build_args(&options, None);

        assert_eq!(&args[..4], ["--print", "--output-format", "stream-json", "--verbose"]);
        assert!(args.contains(&"--include-partial-messages".to_string()));
        assert_eq!(flag_value(&args, "--model"), Some("claude-sonnet-4-20250514"));
        assert_eq!(flag_value(&args, "--permission-mode"), Some("default"));
        assert!(!args.contains(&"--resume".to_string()));
        assert!(!args.contains(&"--tools".to_string()));
        assert!(!args.contains(&"--mcp-config".to_string()));
    }

    #[test]
    fn test_resume_and_tool_args() {
        let options = RuntimeOptions {
            model_id: "m".to_string(),
            resume_session_id: Some("s1".to_string()),
            system_prompt: Some("Be brief".to_string()),
            max_turns: Some(1),
            allowed_tools: vec!["bridge__bash".to_string(), "bridge__read".to_string()],
            disallow_builtin_tools: true,
            permission_mode: PermissionMode::BypassPermissions,
            output_schema: Some(json!({"type": "object"})),
            effort: Some(Effort::High),
            ..Default::default()
        };
        let args = ClaudeCliRuntime::build_args(&options, Some(r#"{"mcpServers":{}}"#));

        assert_eq!(flag_value(&args, "--resume"), Some("s1"));
        assert_eq!(flag_value(&args, "--system-prompt"), Some("Be brief"));
        assert_eq!(flag_value(&args, "--max-turns"), Some("1"));
        assert_eq!(flag_value(&args, "--tools"), Some(""));
        assert_eq!(
            flag_value(&args, "--allowedTools"),
            Some("mcp__caller-tools__bridge__bash,mcp__caller-tools__bridge__read")
        );
        assert_eq!(flag_value(&args, "--permission-mode"), Some("bypassPermissions"));
        assert_eq!(flag_value(&args, "--mcp-config"), Some(r#"{"mcpServers":{}}"#));
        assert!(args.contains(&"--strict-mcp-config".to_string()));
        assert_eq!(flag_value(&args, "--json-schema"), Some(r#"{"type":"object"}"#));
        assert_eq!(flag_value(&args, "--effort"), Some("high"));
    }

    #[test]
    fn test_strip_cli_qualifier() {
        assert_eq!(
            strip_cli_qualifier("mcp__caller-tools__bridge__bash"),
            Some("bridge__bash".to_string())
        );
        assert_eq!(strip_cli_qualifier("Read"), None);
        assert_eq!(strip_cli_qualifier("mcp__other__tool"), None);
    }

    #[test]
    fn test_from_settings_uses_cli_path() {
        let settings = BridgeSettings::builder().cli_path("/opt/claude").build();
        let runtime = ClaudeCliRuntime::from_settings(&settings);
        assert_eq!(runtime.cli_path(), &PathBuf::from("/opt/claude"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_runtime_error() {
        let runtime = ClaudeCliRuntime::new("/nonexistent/claude-bridge-test-binary");
        let result = runtime
            .query(RuntimeQuery {
                prompt: "hi".to_string(),
                options: RuntimeOptions::default(),
            })
            .await;
        assert!(matches!(result, Err(BridgeError::Runtime(_))));
    }
}
