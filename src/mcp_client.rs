// MCP client implementation backed by rmcp

use std::sync::Arc;

use anyhow::Result;
use rmcp::model::{CallToolRequestParams, CallToolResult, JsonObject, RawContent};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{
    ServiceExt,
    model::{ServerInfo, Tool as McpTool},
    service::{RoleClient, RunningService as RmcpRunningService},
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::McpServiceConfig;
use crate::dispatch::{Dispatcher, Query, ToolSelection};
use crate::error::ToolError;
use crate::tools::{ToolContext, ToolFuture, ToolHandler, ToolRegistry};

/// Wrapper for a running MCP service client.
///
/// Holds the configured service id and the rmcp `RunningService` handle used
/// to talk MCP (initialize, list_tools, call_tool, etc.).
pub struct RunningService {
    pub id: String,
    pub client: RmcpRunningService<RoleClient, ()>,
    /// Tools of this service that must not be offered.
    pub disabled_tools: Vec<String>,
}

impl RunningService {
    pub fn new(id: impl Into<String>, client: RmcpRunningService<RoleClient, ()>) -> Self {
        Self {
            id: id.into(),
            client,
            disabled_tools: Vec::new(),
        }
    }
}

pub async fn start_stdio_service(cfg: &McpServiceConfig) -> Result<Option<RunningService>> {
    if let McpServiceConfig::Stdio {
        id,
        command,
        args,
        env,
        disabled,
        disabled_tools,
    } = cfg
    {
        if *disabled {
            info!("Skipping disabled MCP stdio service `{id}`");
            return Ok(None);
        }

        info!("Starting MCP stdio service `{id}` via rmcp");

        let child = TokioChildProcess::new(Command::new(command).configure(|cmd| {
            cmd.args(args.iter()).envs(env.iter());
        }))?;

        let client = ().serve(child).await?;

        Ok(Some(RunningService {
            disabled_tools: disabled_tools.clone(),
            ..RunningService::new(id.clone(), client)
        }))
    } else {
        Ok(None)
    }
}

pub async fn start_http_service(cfg: &McpServiceConfig) -> Result<Option<RunningService>> {
    if let McpServiceConfig::Http {
        id,
        url,
        disabled,
        disabled_tools,
    } = cfg
    {
        if *disabled {
            info!("Skipping disabled MCP HTTP service `{id}`");
            return Ok(None);
        }

        info!("Starting MCP HTTP service `{id}` at `{url}` via rmcp streamable HTTP");

        let transport = StreamableHttpClientTransport::from_uri(url.as_str());
        let client = ().serve(transport).await?;

        Ok(Some(RunningService {
            disabled_tools: disabled_tools.clone(),
            ..RunningService::new(id.clone(), client)
        }))
    } else {
        Ok(None)
    }
}

pub async fn start_service(cfg: &McpServiceConfig) -> Result<Option<RunningService>> {
    match cfg {
        McpServiceConfig::Stdio { .. } => start_stdio_service(cfg).await,
        McpServiceConfig::Http { .. } => start_http_service(cfg).await,
    }
}

/// Fetch service info and tools.
pub async fn inspect_service(running: &RunningService) -> Result<(ServerInfo, Vec<McpTool>)> {
    let server_info = running.client.peer_info().cloned().unwrap_or_default();
    let tools = running.client.list_tools(Default::default()).await?.tools;

    if tools.is_empty() {
        warn!("Service `{}` reported no tools", running.id);
    }

    Ok((server_info, tools))
}

pub async fn call_tool(running: &RunningService, tool_name: &str, args: JsonObject) -> Result<CallToolResult> {
    let request: CallToolRequestParams = serde_json::from_value(serde_json::json!({
        "name": tool_name,
        "arguments": args,
    }))?;
    Ok(running.client.call_tool(request).await?)
}

/// Concatenated text content of a tool result.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A tool served by a remote MCP service, usable like a local one.
pub struct RemoteToolHandler {
    service: Arc<RunningService>,
    tool: McpTool,
}

impl RemoteToolHandler {
    pub fn new(service: Arc<RunningService>, tool: McpTool) -> Self {
        Self { service, tool }
    }
}

impl ToolHandler for RemoteToolHandler {
    fn name(&self) -> &str {
        &self.tool.name
    }

    fn title(&self) -> Option<&str> {
        self.tool.title.as_deref()
    }

    fn description(&self) -> &str {
        self.tool.description.as_deref().unwrap_or_default()
    }

    fn input_schema(&self) -> JsonObject {
        self.tool.input_schema.as_ref().clone()
    }

    fn execute(&self, args: JsonObject, _ctx: &ToolContext) -> ToolFuture<'_> {
        Box::pin(async move {
            let result = call_tool(&self.service, &self.tool.name, args)
                .await
                .map_err(|e| ToolError::Execution(format!("MCP service `{}`: {}", self.service.id, e)))?;
            let text = result_text(&result);
            if result.is_error == Some(true) {
                return Err(ToolError::Execution(text));
            }
            Ok(text)
        })
    }
}

/// Registry of every enabled tool of the given services.
///
/// A tool whose name is already taken by an earlier service is skipped.
pub async fn remote_registry(services: Vec<Arc<RunningService>>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for service in services {
        let (_, tools) = inspect_service(&service).await?;
        for tool in tools {
            if service.disabled_tools.iter().any(|d| d.as_str() == &*tool.name) {
                info!("Tool `{}` of `{}` is disabled", tool.name, service.id);
                continue;
            }
            if registry.contains(&tool.name) {
                warn!("Tool `{}` of `{}` shadows an existing tool, skipping", tool.name, service.id);
                continue;
            }
            registry = registry.register_handler(RemoteToolHandler::new(service.clone(), tool))?;
        }
    }
    Ok(registry)
}

/// Interactive question loop over `input`/`output`, answering with every
/// available tool. Ends on `exit` or end of input.
pub async fn run_chat_loop<R, W>(dispatcher: &Dispatcher, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(b"Available tools:\n").await?;
    for name in dispatcher.registry().list_names() {
        output.write_all(format!(">>> {}\n", name).as_bytes()).await?;
    }

    let mut lines = input.lines();
    loop {
        output.write_all(b"\n>>> QUESTION: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let reply = match dispatcher.respond(Query::new(question), ToolSelection::BySchema).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Chat turn failed: {}", e);
                format!("[error] {}", e)
            }
        };
        output
            .write_all(format!(">>> ASSISTANT: {}\n", reply).as_bytes())
            .await?;
    }
    output.flush().await?;
    Ok(())
}
