//! In-process MCP server exposing bridge tools to the runtime
//!
//! One server is started per invocation that declares caller tools. It lists each
//! tool under its bridge name and routes `tools/call` to [`ToolBridge::execute`].
//! The server lives as long as its [`BridgeServerHandle`].

use crate::constants::names::BRIDGE_SERVER_NAME;
use crate::error::{BridgeError, Result};
use crate::tool_bridge::ToolBridge;
use axum::Router;
use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::StreamableHttpService;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// MCP handler over one invocation's tool bridge
#[derive(Debug, Clone)]
pub struct BridgeServer {
    bridge: Arc<ToolBridge>,
}

impl BridgeServer {
    pub fn new(bridge: Arc<ToolBridge>) -> Self {
        Self { bridge }
    }

    /// MCP tool listing for every bridged tool
    pub fn list_bridge_tools(&self) -> Vec<Tool> {
        self.bridge
            .tools()
            .iter()
            .map(|tool| {
                Tool::new(
                    tool.bridge_name(),
                    tool.description.clone().unwrap_or_default(),
                    Arc::new(schema_object(&tool.input_schema)),
                )
            })
            .collect()
    }
}

/// Input schema as a JSON object, falling back to an open object schema
fn schema_object(schema: &Value) -> JsonObject {
    match schema {
        Value::Object(map) => map.clone(),
        _ => {
            let mut map = JsonObject::new();
            map.insert("type".to_string(), Value::String("object".to_string()));
            map
        }
    }
}

impl ServerHandler for BridgeServer {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.list_bridge_tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        tracing::debug!("BridgeServer: call_tool '{}'", request.name);
        if self.bridge.find(&request.name).is_none() {
            return Err(McpError::invalid_request(
                format!("Unknown tool: {}", request.name),
                None,
            ));
        }

        let input = Value::Object(request.arguments.unwrap_or_default());
        let outcome = self.bridge.execute(&request.name, input).await;
        let content = vec![Content::text(outcome.text)];
        Ok(if outcome.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        })
    }

    fn get_info(&self) -> ServerInfo {
        let mut capabilities = ServerCapabilities::default();
        capabilities.tools = Some(ToolsCapability {
            list_changed: Some(false),
        });
        ServerInfo::new(capabilities)
            .with_protocol_version(ProtocolVersion::default())
            .with_server_info(
                Implementation::new(BRIDGE_SERVER_NAME, env!("CARGO_PKG_VERSION"))
                    .with_title("Caller tool bridge"),
            )
            .with_instructions("Tools declared by the calling application")
    }
}

/// Running bridge server; the server task is aborted when the handle drops
#[derive(Debug)]
pub struct BridgeServerHandle {
    url: String,
    port: u16,
    task: tokio::task::JoinHandle<()>,
}

impl BridgeServerHandle {
    /// Streamable HTTP endpoint, e.g. `http://127.0.0.1:41234/mcp`
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// MCP config document registering this server for the runtime
    pub fn mcp_config(&self) -> Value {
        json!({
            "mcpServers": {
                BRIDGE_SERVER_NAME: {
                    "type": "http",
                    "url": self.url,
                }
            }
        })
    }

    pub fn mcp_config_json(&self) -> String {
        self.mcp_config().to_string()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for BridgeServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a bridge server on a random loopback port
pub async fn start_bridge_server(bridge: Arc<ToolBridge>) -> Result<BridgeServerHandle> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let url = format!("http://127.0.0.1:{}/mcp", port);

    let handler = BridgeServer::new(bridge);
    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        Arc::new(LocalSessionManager::default()),
        Default::default(),
    );
    let router = Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(health_check));

    tracing::debug!("BridgeServer listening on {}", url);
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("BridgeServer error: {}", e);
        }
    });

    if task.is_finished() {
        return Err(BridgeError::Internal(
            "Bridge server task exited during startup".to_string(),
        ));
    }

    Ok(BridgeServerHandle { url, port, task })
}

async fn health_check() -> axum::Json<Value> {
    axum::Json(json!({ "status": "healthy", "service": BRIDGE_SERVER_NAME }))
}
