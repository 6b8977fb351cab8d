// REST API endpoints: chat, tool-calling and knowledge-base routes

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::chat::ChatOptions;
use crate::dispatch::{AnswerStream, Dispatcher, Query as ChatQuery, ToolSelection};
use crate::error::DispatchError;
use crate::rag::RagService;

pub const WEATHER_TOOL: &str = "getWeather";
pub const TRANSLATE_TOOL: &str = "baiduTranslate";

/// Conversation shared by the hello-world chat endpoints that take no id.
pub const DEFAULT_CONVERSATION_ID: &str = "default";

const STREAM_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub rag: Arc<RagService>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/helloworld/simple/chat", get(simple_chat))
        .route("/helloworld/stream/chat", get(stream_chat))
        .route("/helloworld/advisor/chat/{conversation_id}", get(advisor_chat))
        .route("/helloworld/advisor/newChat", get(new_chat))
        .route("/time/chat", get(time_chat))
        .route("/time/chat-tool-method", get(time_chat_with_tools))
        .route("/weather/chat", get(weather_chat))
        .route("/weather/chat-tool-function-name", get(weather_chat_with_tool))
        .route("/translate/chat", get(translate_chat))
        .route("/translate/chat-tool-function-callback", get(translate_chat_with_tool))
        .route("/ai/bailian/knowledge/importDocument", get(import_document))
        .route("/ai/bailian/knowledge/generate", get(knowledge_generate))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Error body: `{"status":"error","kind":...,"reason":...}`.
#[derive(Debug)]
pub enum ApiError {
    Dispatch(DispatchError),
    Internal(String),
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, reason) = match self {
            Self::Dispatch(e) => {
                let status = if e.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (status, e.kind(), e.to_string())
            }
            Self::Internal(reason) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", reason),
        };
        warn!("Request failed ({}): {}", kind, reason);
        (
            status,
            Json(json!({ "status": "error", "kind": kind, "reason": reason })),
        )
            .into_response()
    }
}

/// Stream answer fragments as a plain-text body. A failure after the first
/// fragment ends the body early.
fn text_stream(stream: AnswerStream) -> Response {
    let body = Body::from_stream(stream.map(|item| {
        item.inspect_err(|e| warn!("Answer stream failed: {}", e))
    }));
    ([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], body).into_response()
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

fn default_greeting() -> String {
    "你好，很高兴认识你，能简单介绍一下自己吗？".to_string()
}

fn default_time_question() -> String {
    "请告诉我现在北京时间几点了".to_string()
}

fn default_weather_question() -> String {
    "请告诉我北京1天以后的天气".to_string()
}

fn default_translate_request() -> String {
    "帮我把以下内容翻译成英文：你好，世界。".to_string()
}

fn default_knowledge_question() -> String {
    "你好，请问知识库文档主要是关于什么内容的?".to_string()
}

#[derive(Debug, Deserialize)]
struct GreetingParams {
    #[serde(default = "default_greeting")]
    query: String,
}

#[derive(Debug, Deserialize)]
struct TimeParams {
    #[serde(default = "default_time_question")]
    query: String,
}

#[derive(Debug, Deserialize)]
struct WeatherParams {
    #[serde(default = "default_weather_question")]
    query: String,
}

#[derive(Debug, Deserialize)]
struct TranslateParams {
    #[serde(default = "default_translate_request")]
    query: String,
}

#[derive(Debug, Deserialize)]
struct RequiredQuery {
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewChatParams {
    #[serde(default = "default_greeting")]
    query: String,
    top_p: Option<f64>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct KnowledgeParams {
    #[serde(default = "default_knowledge_question")]
    message: String,
}

async fn ask(state: &AppState, query: String, selection: ToolSelection) -> Result<String, ApiError> {
    Ok(state.dispatcher.respond(ChatQuery::new(query), selection).await?)
}

async fn simple_chat(
    State(state): State<AppState>,
    Query(params): Query<GreetingParams>,
) -> Result<String, ApiError> {
    let query = ChatQuery::new(params.query).with_conversation(DEFAULT_CONVERSATION_ID);
    Ok(state.dispatcher.respond(query, ToolSelection::None).await?)
}

async fn stream_chat(
    State(state): State<AppState>,
    Query(params): Query<GreetingParams>,
) -> Result<Response, ApiError> {
    let query = ChatQuery::new(params.query).with_conversation(DEFAULT_CONVERSATION_ID);
    let stream = state
        .dispatcher
        .respond_stream(query, ToolSelection::None)
        .await?;
    Ok(text_stream(stream))
}

/// Streamed chat whose history is kept per conversation id.
async fn advisor_chat(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<RequiredQuery>,
) -> Result<Response, ApiError> {
    let query = ChatQuery::new(params.query).with_conversation(conversation_id);
    let stream = state
        .dispatcher
        .respond_stream(query, ToolSelection::None)
        .await?;
    Ok(text_stream(stream))
}

/// Streamed chat with per-request sampling options.
async fn new_chat(
    State(state): State<AppState>,
    Query(params): Query<NewChatParams>,
) -> Result<Response, ApiError> {
    let options = ChatOptions {
        top_p: params.top_p,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        ..Default::default()
    };
    let query = ChatQuery::new(params.query)
        .with_conversation(DEFAULT_CONVERSATION_ID)
        .with_options(options);
    let stream = state
        .dispatcher
        .respond_stream(query, ToolSelection::None)
        .await?;
    Ok(text_stream(stream))
}

async fn time_chat(
    State(state): State<AppState>,
    Query(params): Query<TimeParams>,
) -> Result<String, ApiError> {
    ask(&state, params.query, ToolSelection::None).await
}

async fn time_chat_with_tools(
    State(state): State<AppState>,
    Query(params): Query<TimeParams>,
) -> Result<String, ApiError> {
    ask(&state, params.query, ToolSelection::BySchema).await
}

async fn weather_chat(
    State(state): State<AppState>,
    Query(params): Query<WeatherParams>,
) -> Result<String, ApiError> {
    ask(&state, params.query, ToolSelection::None).await
}

async fn weather_chat_with_tool(
    State(state): State<AppState>,
    Query(params): Query<WeatherParams>,
) -> Result<String, ApiError> {
    ask(&state, params.query, ToolSelection::by_name([WEATHER_TOOL])).await
}

async fn translate_chat(
    State(state): State<AppState>,
    Query(params): Query<TranslateParams>,
) -> Result<String, ApiError> {
    ask(&state, params.query, ToolSelection::None).await
}

async fn translate_chat_with_tool(
    State(state): State<AppState>,
    Query(params): Query<TranslateParams>,
) -> Result<String, ApiError> {
    ask(&state, params.query, ToolSelection::by_name([TRANSLATE_TOOL])).await
}

async fn import_document(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let chunks = state
        .rag
        .import_documents()
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;

    Ok(Json(json!({
        "status": "ok",
        "chunks_imported": chunks,
    })))
}

async fn knowledge_generate(
    State(state): State<AppState>,
    Query(params): Query<KnowledgeParams>,
) -> Result<Response, ApiError> {
    let stream = state.rag.generate(&params.message).await?;
    Ok(text_stream(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMessage, Generation, GenerationRequest, MockChatModel, ToolCall};
    use crate::error::ToolError;
    use crate::memory::MessageWindowMemory;
    use crate::rag::InMemoryKnowledgeBase;
    use crate::tools::test_support::FailingTool;
    use crate::tools::{CityTimeTool, ToolContext, ToolFuture, ToolHandler, ToolRegistry};
    use axum::http::Request;
    use rmcp::model::JsonObject;
    use std::io::Write;
    use tower::ServiceExt;

    /// Calls `getCityTime` when offered and no result is in yet; otherwise
    /// echoes the tool result or the last user message.
    fn model() -> MockChatModel {
        MockChatModel::new(|request: &GenerationRequest| {
            if let Some(ChatMessage::Tool { content, .. }) = request.messages.last() {
                return Ok(Generation::text(content.clone()));
            }
            if request.tools.iter().any(|t| t.name.as_str() == "getCityTime") {
                return Ok(Generation::tool_calls(vec![ToolCall::new(
                    "call_1",
                    "getCityTime",
                    r#"{"timeZoneId":"Asia/Shanghai"}"#,
                )]));
            }
            if request.tools.iter().any(|t| t.name.as_str() == "baiduTranslate") {
                return Ok(Generation::tool_calls(vec![ToolCall::new(
                    "call_1",
                    "baiduTranslate",
                    r#"{"q":"你好","to":"en"}"#,
                )]));
            }
            let last_user = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role() == "user")
                .map(|m| m.content().to_string())
                .unwrap_or_default();
            Ok(Generation::text(last_user))
        })
    }

    /// `baiduTranslate` stand-in whose backend is down.
    struct DownTranslate;

    impl ToolHandler for DownTranslate {
        fn name(&self) -> &str {
            TRANSLATE_TOOL
        }

        fn description(&self) -> &str {
            "translate"
        }

        fn input_schema(&self) -> JsonObject {
            FailingTool.input_schema()
        }

        fn execute(&self, _args: JsonObject, _ctx: &ToolContext) -> ToolFuture<'_> {
            Box::pin(async { Err(ToolError::Execution("translate backend unavailable".into())) })
        }
    }

    fn app_with(model: Arc<MockChatModel>, document: Option<std::path::PathBuf>) -> Router {
        let registry = ToolRegistry::new()
            .register_handler(CityTimeTool::new())
            .unwrap()
            .register_handler(DownTranslate)
            .unwrap();
        let dispatcher = Dispatcher::new(model, Arc::new(registry))
            .with_memory(Arc::new(MessageWindowMemory::new()));

        let mut rag = RagService::new(Arc::new(InMemoryKnowledgeBase::new()), dispatcher.clone());
        if let Some(path) = document {
            rag = rag.with_document_path(path);
        }
        create_router(AppState {
            dispatcher,
            rag: Arc::new(rag),
        })
    }

    fn app() -> Router {
        app_with(Arc::new(model()), None)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = get(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn test_simple_chat_uses_default_query() {
        let (status, _, body) = get(app(), "/helloworld/simple/chat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, default_greeting());
    }

    #[tokio::test]
    async fn test_stream_chat_is_plain_text() {
        let (status, content_type, body) = get(app(), "/helloworld/stream/chat?query=hello%20stream").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(STREAM_CONTENT_TYPE));
        assert_eq!(body, "hello stream");
    }

    #[tokio::test]
    async fn test_advisor_chat_requires_query() {
        let (status, _, _) = get(app(), "/helloworld/advisor/chat/123").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_advisor_chat_remembers_conversation() {
        let model = Arc::new(model());
        let app = app_with(model.clone(), None);

        let (status, _, _) = get(app.clone(), "/helloworld/advisor/chat/123?query=I%20am%20jack").await;
        assert_eq!(status, StatusCode::OK);

        // History is saved by the stream producer once it finishes.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (status, _, _) = get(app, "/helloworld/advisor/chat/123?query=who%20am%20I").await;
        assert_eq!(status, StatusCode::OK);

        let second = &model.requests()[1];
        assert!(second.messages.iter().any(|m| m.content() == "I am jack"));
    }

    #[tokio::test]
    async fn test_simple_chat_shares_default_conversation() {
        let model = Arc::new(model());
        let app = app_with(model.clone(), None);

        let (status, _, _) = get(app.clone(), "/helloworld/simple/chat?query=I%20am%20jack").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = get(app.clone(), "/helloworld/simple/chat?query=who%20am%20I").await;
        assert_eq!(status, StatusCode::OK);
        assert!(model.requests()[1].messages.iter().any(|m| m.content() == "I am jack"));

        // The advisor endpoint keeps its own id apart from the default one.
        let (status, _, _) = get(app, "/helloworld/advisor/chat/other?query=hello").await;
        assert_eq!(status, StatusCode::OK);
        assert!(!model.requests()[2].messages.iter().any(|m| m.content() == "I am jack"));
    }

    #[tokio::test]
    async fn test_new_chat_forwards_options() {
        let model = Arc::new(model());
        let app = app_with(model.clone(), None);
        let (status, _, body) = get(app, "/helloworld/advisor/newChat?query=hi&topP=0.8&maxTokens=64").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hi");

        let options = &model.requests()[0].options;
        assert_eq!(options.top_p, Some(0.8));
        assert_eq!(options.max_tokens, Some(64));
        assert_eq!(options.temperature, None);
    }

    #[tokio::test]
    async fn test_new_chat_rejects_malformed_numbers() {
        let (status, _, _) = get(app(), "/helloworld/advisor/newChat?topP=high").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_time_tool_method() {
        let (status, _, body) = get(app(), "/time/chat-tool-method").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Asia/Shanghai"), "{}", body);
    }

    #[tokio::test]
    async fn test_time_chat_without_tools() {
        let (status, _, body) = get(app(), "/time/chat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, default_time_question());
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_bad_request() {
        let (status, _, body) = get(app(), "/weather/chat-tool-function-name").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "unknown_tool");
    }

    #[tokio::test]
    async fn test_model_calling_unoffered_tool_is_bad_gateway() {
        let model = MockChatModel::new(|_: &GenerationRequest| {
            Ok(Generation::tool_calls(vec![ToolCall::new("call_1", "getWeather", r#"{"city":"Beijing"}"#)]))
        });
        let (status, _, body) = get(app_with(Arc::new(model), None), "/time/chat-tool-method").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["kind"], "unknown_tool");
    }

    #[tokio::test]
    async fn test_tool_failure_is_bad_gateway() {
        let (status, _, body) = get(app(), "/translate/chat-tool-function-callback").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["kind"], "tool_execution");
    }

    #[tokio::test]
    async fn test_knowledge_import_and_generate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "The knowledge base describes the quickstart guide.").unwrap();
        let app = app_with(Arc::new(model()), Some(file.path().to_path_buf()));

        let (status, _, body) = get(app.clone(), "/ai/bailian/knowledge/importDocument").await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["chunks_imported"], 1);

        let (status, _, body) = get(app, "/ai/bailian/knowledge/generate?message=quickstart").await;
        assert_eq!(status, StatusCode::OK);
        // The echo model returns the augmented prompt.
        assert!(body.contains("The knowledge base describes the quickstart guide."));
        assert!(body.contains("Query: quickstart"));
    }

    #[tokio::test]
    async fn test_import_without_document_is_internal_error() {
        let (status, _, body) = get(app(), "/ai/bailian/knowledge/importDocument").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["kind"], "internal");
    }
}
