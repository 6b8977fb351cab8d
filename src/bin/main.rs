use ai_toolchat::{
    AppConfig, Query, ToolSelection, create_app_state, create_builtin_tools, create_chat_model, create_dispatcher,
    create_router, mcp_client, server,
};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ai-toolchat")]
#[command(about = "Tool-calling chat service with an MCP tool server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat REST server
    Serve {
        /// Bind address; overrides `server.bind` from the config file
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run the built-in tools as an MCP stdio server (for use in mcp.json)
    McpStdio,
    /// Run the built-in tools as an MCP HTTP server
    McpHttp {
        /// Bind address, e.g. 0.0.0.0:3942
        #[arg(long, default_value = "0.0.0.0:3942")]
        bind: String,
    },
    /// Chat interactively with the tools of the configured MCP services
    Chat,
    /// Answer a single question
    Ask {
        query: String,
        /// Which built-in tools to offer the model
        #[arg(long, value_enum, default_value_t = ToolsArg::Schema)]
        tools: ToolsArg,
        /// Tool names offered with `--tools name`
        #[arg(long = "tool")]
        tool_names: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ToolsArg {
    None,
    Name,
    Schema,
}

impl ToolsArg {
    fn selection(self, names: Vec<String>) -> ToolSelection {
        match self {
            Self::None => ToolSelection::None,
            Self::Name => ToolSelection::by_name(names),
            Self::Schema => ToolSelection::BySchema,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the MCP stdio transport and the chat loop.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ai_toolchat=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            if config.chat.api_key.is_empty() {
                warn!("No chat API key configured; set AI_DASHSCOPE_API_KEY");
            }

            let state = create_app_state(&config, create_chat_model(&config))?;
            let app = create_router(state);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Chat server listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
        Commands::McpStdio => {
            info!("Starting MCP stdio server (rmcp)");
            server::serve_stdio(create_builtin_tools(&config)?).await?;
        }
        Commands::McpHttp { bind } => {
            info!("Starting MCP HTTP server (rmcp) on {}", bind);
            server::start_mcp_http(create_builtin_tools(&config)?, &bind).await?;
        }
        Commands::Chat => {
            let mut services = Vec::new();
            for cfg in config.mcp_services()? {
                match mcp_client::start_service(&cfg).await {
                    Ok(Some(running)) => services.push(Arc::new(running)),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to start MCP service: {:#}", e),
                }
            }
            if services.is_empty() {
                warn!("No MCP services running; configure `mcpServers`");
            }

            // Services shut down once the last tool handle is dropped.
            let registry = Arc::new(mcp_client::remote_registry(services).await?);
            let dispatcher = create_dispatcher(&config, create_chat_model(&config), registry);

            mcp_client::run_chat_loop(&dispatcher, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
        }
        Commands::Ask {
            query,
            tools,
            tool_names,
        } => {
            let state = create_app_state(&config, create_chat_model(&config))?;
            let answer = state
                .dispatcher
                .respond(Query::new(query), tools.selection(tool_names))
                .await?;
            println!("{}", answer);
        }
    }

    Ok(())
}
