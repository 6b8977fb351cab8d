//! MCP server implementation using rmcp.
//!
//! Exposes the tool registry to MCP clients over stdio or streamable HTTP.


use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{StreamableHttpService, session::local::LocalSessionManager};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer, ServiceExt},
};
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::tools::{ToolContext, ToolRegistry};

/// MCP server that lists and runs the registry's tools.
#[derive(Clone)]
pub struct McpServer {
    tool_registry: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(tool_registry: Arc<ToolRegistry>) -> Self {
        Self { tool_registry }
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tool_registry
    }
}

/// Map a registry outcome to an MCP tool result.
///
/// Unknown tools are a protocol error; validation and execution failures are
/// reported in-band so the calling model can see them.
fn to_call_result(outcome: Result<String, DispatchError>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(DispatchError::UnknownTool(name)) => {
            Err(McpError::invalid_params(format!("Unknown tool: {}", name), None))
        }
        Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
    }
}

impl ServerHandler for McpServer {
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let result = ListToolsResult {
            tools: self.tool_registry.list_tools(),
            next_cursor: None,
            ..Default::default()
        };
        std::future::ready(Ok(result))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = request.arguments.unwrap_or_default();
        let registry = self.tool_registry.clone();

        async move {
            debug!("MCP call_tool {}", tool_name);
            let ctx = ToolContext::detached();
            to_call_result(registry.invoke(&tool_name, args, &ctx).await)
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Tool server offering getCityTime (current time in a time zone), \
                 getWeather (forecast for a city) and baiduTranslate (text translation)."
                    .to_string(),
            ),
        }
    }
}

/// Serve the registry over stdio until the client disconnects.
pub async fn serve_stdio(tool_registry: Arc<ToolRegistry>) -> Result<()> {
    let service = McpServer::new(tool_registry)
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

    service.waiting().await?;
    info!("MCP stdio server session ended");
    Ok(())
}

/// Router exposing the registry as an MCP streamable HTTP endpoint at `/mcp`.
pub fn mcp_router(tool_registry: Arc<ToolRegistry>) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(McpServer::new(tool_registry.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    Router::new().nest_service("/mcp", service)
}

/// Start the MCP streamable HTTP server on `bind` (e.g. `0.0.0.0:3942`).
pub async fn start_mcp_http(tool_registry: Arc<ToolRegistry>, bind: &str) -> Result<()> {
    let router = mcp_router(tool_registry);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("MCP HTTP server listening on http://{}/mcp", bind);

    axum::serve(listener, router).await?;
    Ok(())
}
