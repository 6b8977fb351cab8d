// Core modules
pub mod config;
pub mod error;
pub mod schema;
pub mod types;

// Model access, history and dispatch
pub mod chat;
pub mod dispatch;
pub mod memory;
pub mod rag;

// Tools and their surfaces
pub mod api;
pub mod mcp_client;
pub mod server;
pub mod tools;

// Re-export key types and functions
pub use api::{AppState, create_router};
pub use config::{AppConfig, McpServiceConfig};
pub use dispatch::{AnswerStream, Dispatcher, Query, ToolSelection};
pub use error::{DispatchError, ToolError};
pub use server::McpServer;
pub use tools::{ToolHandler, ToolRegistry};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chat::{ChatModel, OpenAiCompatibleConfig, OpenAiCompatibleModel};
use memory::MessageWindowMemory;
use rag::{InMemoryKnowledgeBase, RagService};
use tools::{TranslateConfig, WeatherConfig, builtin_registry};

/// Chat model described by the `chat` config section.
pub fn create_chat_model(config: &AppConfig) -> Arc<dyn ChatModel> {
    let section = &config.chat;
    Arc::new(OpenAiCompatibleModel::new(OpenAiCompatibleConfig {
        base_url: section.base_url.clone(),
        api_key: section.api_key.clone(),
        model: section.model.clone(),
        request_timeout: Duration::from_secs(section.request_timeout_secs),
        stream_idle_timeout: Duration::from_secs(section.stream_idle_timeout_secs),
        ..Default::default()
    }))
}

/// Registry of the built-in `getCityTime`, `getWeather` and `baiduTranslate` tools.
pub fn create_builtin_tools(config: &AppConfig) -> Result<Arc<ToolRegistry>> {
    let weather = WeatherConfig {
        base_url: config.tools.weather.base_url.clone(),
        ..WeatherConfig::new(config.tools.weather.api_key.clone())
    };
    let translate = TranslateConfig {
        endpoint: config.tools.baidu_translate.endpoint.clone(),
        ..TranslateConfig::new(
            config.tools.baidu_translate.app_id.clone(),
            config.tools.baidu_translate.secret_key.clone(),
        )
    };
    Ok(Arc::new(builtin_registry(weather, translate)?))
}

/// Dispatcher over `registry` with windowed conversation memory and the
/// configured system prompt, sampling defaults and round limit.
pub fn create_dispatcher(config: &AppConfig, model: Arc<dyn ChatModel>, registry: Arc<ToolRegistry>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(model, registry)
        .with_memory(Arc::new(
            MessageWindowMemory::with_max_messages(config.memory.max_messages)
                .with_max_conversations(config.memory.max_conversations),
        ))
        .with_default_options(config.chat.default_options())
        .with_max_tool_rounds(config.chat.max_tool_rounds);
    if let Some(prompt) = &config.chat.system_prompt {
        dispatcher = dispatcher.with_system_prompt(prompt.clone());
    }
    dispatcher
}

/// Everything the REST API needs, built from `config`.
pub fn create_app_state(config: &AppConfig, model: Arc<dyn ChatModel>) -> Result<AppState> {
    let dispatcher = create_dispatcher(config, model, create_builtin_tools(config)?);

    let knowledge_base = Arc::new(InMemoryKnowledgeBase::with_chunk_chars(config.rag.chunk_chars));
    let mut rag = RagService::new(knowledge_base, dispatcher.clone()).with_top_k(config.rag.top_k);
    if let Some(path) = &config.rag.document_path {
        rag = rag.with_document_path(path.clone());
    }

    Ok(AppState {
        dispatcher,
        rag: Arc::new(rag),
    })
}
