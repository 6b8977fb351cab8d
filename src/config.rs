//! Application configuration.
//!
//! Read from a JSON file (`AI_TOOLCHAT_CONFIG`, else `./toolchat.json`, else
//! built-in defaults). Every string value may reference environment variables
//! as `${NAME}`; unknown names are left as written.

use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::chat::{ChatOptions, DASHSCOPE_COMPATIBLE_BASE};
use crate::tools::{BAIDU_TRANSLATE_URL, WEATHER_API_BASE};

pub const CONFIG_ENV: &str = "AI_TOOLCHAT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "toolchat.json";
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个博学的智能聊天助手，请根据用户提问回答！";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub server: ServerSection,
    pub chat: ChatSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
    pub rag: RagSection,
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSection {
    /// Bind address of the HTTP API.
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatSection {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    /// Longest silence tolerated while a streamed answer is in flight.
    pub stream_idle_timeout_secs: u64,
    pub max_tool_rounds: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            base_url: DASHSCOPE_COMPATIBLE_BASE.to_string(),
            api_key: String::new(),
            model: "qwen-plus".to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: None,
            top_p: Some(0.7),
            max_tokens: None,
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 60,
            max_tool_rounds: crate::dispatch::DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl ChatSection {
    /// Sampling options applied to every query unless the query overrides them.
    pub fn default_options(&self) -> ChatOptions {
        ChatOptions {
            model: Some(self.model.clone()),
            top_p: self.top_p,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemorySection {
    pub max_messages: usize,
    /// Conversations kept at once; the least recently used is dropped first.
    pub max_conversations: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_messages: crate::memory::DEFAULT_MAX_MESSAGES,
            max_conversations: crate::memory::DEFAULT_MAX_CONVERSATIONS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsSection {
    pub weather: WeatherSection,
    pub baidu_translate: TranslateSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WeatherSection {
    pub api_key: String,
    pub base_url: String,
}

impl Default for WeatherSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: WEATHER_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranslateSection {
    pub app_id: String,
    pub secret_key: String,
    pub endpoint: String,
}

impl Default for TranslateSection {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            secret_key: String::new(),
            endpoint: BAIDU_TRANSLATE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RagSection {
    /// Document imported by `/ai/bailian/knowledge/importDocument`.
    pub document_path: Option<PathBuf>,
    pub chunk_chars: usize,
    pub top_k: usize,
}

impl Default for RagSection {
    fn default() -> Self {
        Self {
            document_path: None,
            chunk_chars: crate::rag::DEFAULT_CHUNK_CHARS,
            top_k: crate::rag::DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct McpServerConfig {
    // stdio server
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    // http server
    #[serde(default)]
    pub url: Option<String>,

    // flags
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, alias = "disabledTools")]
    pub disabled_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum McpServiceConfig {
    Stdio {
        id: String,
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        disabled: bool,
        disabled_tools: Vec<String>,
    },
    Http {
        id: String,
        url: String,
        disabled: bool,
        disabled_tools: Vec<String>,
    },
}

impl McpServiceConfig {
    pub fn from_json(id: String, cfg: McpServerConfig) -> anyhow::Result<Self> {
        if let Some(cmd) = cfg.command {
            return Ok(McpServiceConfig::Stdio {
                id,
                command: cmd,
                args: cfg.args,
                env: cfg.env,
                disabled: cfg.disabled,
                disabled_tools: cfg.disabled_tools,
            });
        }

        if let Some(url) = cfg.url {
            return Ok(McpServiceConfig::Http {
                id,
                url,
                disabled: cfg.disabled,
                disabled_tools: cfg.disabled_tools,
            });
        }

        Err(anyhow::anyhow!(
            "Server `{}` must have either `command` or `url`",
            id
        ))
    }
}

/// Config file to load, if any.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }

    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

/// Replace `${NAME}` with the value `lookup` returns for `NAME`.
fn expand_vars_with(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            match lookup(&name) {
                Some(val) if closed => out.push_str(&val),
                _ => {
                    out.push_str("${");
                    out.push_str(&name);
                    if closed {
                        out.push('}');
                    }
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => *s = expand_vars_with(s, lookup),
        Value::Array(items) => items.iter_mut().for_each(|v| expand_value(v, lookup)),
        Value::Object(map) => map.values_mut().for_each(|v| expand_value(v, lookup)),
        _ => {}
    }
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Fill an empty setting from an environment variable.
fn fill_from_env(slot: &mut String, var: &str, lookup: &dyn Fn(&str) -> Option<String>) {
    if slot.is_empty() {
        if let Some(val) = lookup(var) {
            *slot = val;
        }
    }
}

impl AppConfig {
    /// Load from the resolved config file, or defaults if there is none.
    pub fn load() -> anyhow::Result<Self> {
        match resolve_config_path() {
            Some(path) => Self::from_path(&path),
            None => {
                info!("No config file found, using defaults");
                Self::from_value(Value::Object(Default::default()), &env_lookup)
            }
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let value: Value = serde_json::from_str(&raw)?;
        info!("Loaded config from {}", path.display());
        Self::from_value(value, &env_lookup)
    }

    fn from_value(mut value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        expand_value(&mut value, lookup);
        let mut cfg: AppConfig = serde_json::from_value(value)?;

        fill_from_env(&mut cfg.chat.api_key, "AI_DASHSCOPE_API_KEY", lookup);
        fill_from_env(&mut cfg.tools.weather.api_key, "WEATHER_API_KEY", lookup);
        fill_from_env(&mut cfg.tools.baidu_translate.app_id, "BAIDU_TRANSLATE_APP_ID", lookup);
        fill_from_env(&mut cfg.tools.baidu_translate.secret_key, "BAIDU_TRANSLATE_SECRET_KEY", lookup);
        Ok(cfg)
    }

    /// Configured MCP services, in id order.
    pub fn mcp_services(&self) -> anyhow::Result<Vec<McpServiceConfig>> {
        self.mcp_servers
            .iter()
            .map(|(id, cfg)| McpServiceConfig::from_json(id.clone(), cfg.clone()))
            .collect()
    }
}
