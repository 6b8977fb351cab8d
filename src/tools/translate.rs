//! `baiduTranslate`: Baidu general text translation API.
//!
//! Requests are signed with `md5(appid + q + salt + secret)`.

use std::time::Duration;

use md5::{Digest, Md5};
use rmcp::model::JsonObject;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::registry::{ToolContext, ToolFuture, ToolHandler};
use crate::error::ToolError;

pub const BAIDU_TRANSLATE_URL: &str = "https://fanyi-api.baidu.com/api/trans/vip/translate";

#[derive(Debug, Clone)]
pub struct TranslateConfig {
    pub app_id: String,
    pub secret_key: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl TranslateConfig {
    pub fn new(app_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            secret_key: secret_key.into(),
            endpoint: BAIDU_TRANSLATE_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(default)]
    trans_result: Vec<TranslatedLine>,
}

#[derive(Debug, Deserialize)]
struct TranslatedLine {
    dst: String,
}

/// Hex MD5 signature expected by the API.
pub fn sign(app_id: &str, query: &str, salt: &str, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(app_id.as_bytes());
    hasher.update(query.as_bytes());
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct BaiduTranslateTool {
    config: TranslateConfig,
    http: reqwest::Client,
}

impl BaiduTranslateTool {
    pub fn new(config: TranslateConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    async fn translate(&self, q: &str, from: &str, to: &str) -> Result<String, ToolError> {
        let salt = chrono::Utc::now().timestamp_millis().to_string();
        let sign = sign(&self.config.app_id, q, &salt, &self.config.secret_key);
        debug!("Translating {} chars from {} to {}", q.chars().count(), from, to);

        let url = reqwest::Url::parse_with_params(
            &self.config.endpoint,
            [
                ("q", q),
                ("from", from),
                ("to", to),
                ("appid", self.config.app_id.as_str()),
                ("salt", salt.as_str()),
                ("sign", sign.as_str()),
            ],
        )
        .map_err(|e| ToolError::Execution(format!("invalid translation endpoint: {}", e)))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("translation service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Execution(format!(
                "translation service returned {}: {}",
                status, body
            )));
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("unexpected translation response: {}", e)))?;

        if let Some(code) = parsed.error_code.filter(|c| c != "52000") {
            return Err(ToolError::Execution(format!(
                "translation failed with code {}: {}",
                code,
                parsed.error_msg.unwrap_or_default()
            )));
        }
        if parsed.trans_result.is_empty() {
            return Err(ToolError::Execution("translation returned no result".to_string()));
        }

        Ok(parsed
            .trans_result
            .into_iter()
            .map(|line| line.dst)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl ToolHandler for BaiduTranslateTool {
    fn name(&self) -> &str {
        "baiduTranslate"
    }

    fn description(&self) -> &str {
        "Baidu translation function for general text translation"
    }

    fn input_schema(&self) -> JsonObject {
        let schema = json!({
            "type": "object",
            "properties": {
                "q": {
                    "type": "string",
                    "description": "Content that needs to be translated"
                },
                "from": {
                    "type": "string",
                    "description": "Source language, such as zh or en; auto to detect"
                },
                "to": {
                    "type": "string",
                    "description": "Target language, such as en or zh"
                }
            },
            "required": ["q", "to"]
        });
        schema.as_object().cloned().unwrap_or_default()
    }

    fn execute(&self, args: JsonObject, _ctx: &ToolContext) -> ToolFuture<'_> {
        Box::pin(async move {
            let text = |key: &str| args.get(key).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty());

            let q = text("q").ok_or_else(|| ToolError::InvalidArguments("q is required".to_string()))?;
            let to = text("to").ok_or_else(|| ToolError::InvalidArguments("to is required".to_string()))?;
            let from = text("from").unwrap_or("auto");
            self.translate(q, from, to).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::Query, routing::get};
    use std::collections::HashMap;

    async fn spawn_translate_api() -> String {
        let app = Router::new().route(
            "/translate",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let field = |k: &str| q.get(k).cloned().unwrap_or_default();
                let expected = sign(&field("appid"), &field("q"), &field("salt"), "secret");
                if field("sign") != expected {
                    return Json(json!({"error_code": "54001", "error_msg": "Invalid Sign"}));
                }
                Json(json!({
                    "from": field("from"),
                    "to": field("to"),
                    "trans_result": [{ "src": field("q"), "dst": "Hello, world." }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/translate", addr)
    }

    fn tool(endpoint: String, secret: &str) -> BaiduTranslateTool {
        BaiduTranslateTool::new(TranslateConfig {
            endpoint,
            ..TranslateConfig::new("app", secret)
        })
    }

    fn args(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sign_matches_known_digest() {
        // md5("") and md5("abc") reference values.
        assert_eq!(sign("", "", "", ""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(sign("a", "b", "c", ""), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_translates_with_valid_signature() {
        let endpoint = spawn_translate_api().await;
        let out = tool(endpoint, "secret")
            .execute(args(json!({"q": "你好，世界。", "to": "en"})), &ToolContext::detached())
            .await
            .unwrap();
        assert_eq!(out, "Hello, world.");
    }

    #[tokio::test]
    async fn test_api_error_code_is_execution_failure() {
        let endpoint = spawn_translate_api().await;
        let err = tool(endpoint, "wrong")
            .execute(args(json!({"q": "你好", "to": "en"})), &ToolContext::detached())
            .await
            .unwrap_err();
        match err {
            ToolError::Execution(reason) => assert!(reason.contains("54001"), "{}", reason),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_target_language() {
        let tool = tool("http://127.0.0.1:9/translate".to_string(), "secret");
        let err = tool
            .execute(args(json!({"q": "你好"})), &ToolContext::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
