//! Reserved names and raw reason strings

/// Prefix placing caller-declared tools in the bridge's private namespace
pub const BRIDGE_TOOL_PREFIX: &str = "bridge__";

/// Name of the in-process MCP server that hosts bridge tools
pub const BRIDGE_SERVER_NAME: &str = "caller-tools";

/// Provider metadata / options namespace owned by this crate
pub const PROVIDER_NAMESPACE: &str = "claude-bridge";

/// Raw finish reason reported when tool routing produced nothing usable
pub const EMPTY_TOOL_ROUTING_OUTPUT: &str = "empty-tool-routing-output";

/// Raw finish reason reported when consuming the runtime stream failed
pub const STREAM_BRIDGE_ERROR: &str = "stream-bridge-error";

/// Raw finish reason reported when the caller cancelled the invocation
pub const ABORTED: &str = "aborted";

/// Result text returned by bridge tools that have no executor
pub const TOOL_EXECUTION_DISABLED: &str =
    "Tool execution is disabled in this bridge; the call is returned to the caller instead.";

/// Result subtype the runtime reports when structured output retries ran out
pub const STRUCTURED_OUTPUT_EXHAUSTED: &str = "error_max_structured_output_retries";

/// Result subtype the runtime reports when the turn limit was reached
pub const MAX_TURNS_REACHED: &str = "error_max_turns";

/// Result subtype for a successful run
pub const RESULT_SUCCESS: &str = "success";

/// Qualifier the CLI puts in front of tools served by the bridge server
pub const CLI_BRIDGE_TOOL_QUALIFIER: &str = "mcp__caller-tools__";
