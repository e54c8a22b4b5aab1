use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub providers: ProvidersConfig,
    pub history: HistoryConfig,
    pub chat: ChatConfig,
    /// Extra models merged into the built-in registry. An entry whose key
    /// already exists replaces the built-in descriptor.
    pub models: Vec<ModelEntry>,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub openrouter: OpenRouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenRouterConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub extra_headers: Option<HashMap<String, String>>,
    /// Sent as `HTTP-Referer` for OpenRouter app attribution.
    pub referer: String,
    /// Sent as `X-Title`.
    pub title: String,
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            extra_headers: None,
            referer: "http://localhost".into(),
            title: "UnisynAI Backend".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,
    /// SQLite database path, `~` is expanded.
    pub path: String,
    /// Most recent messages considered per partition read.
    pub message_limit: usize,
    /// Cumulative token budget per partition read.
    pub token_budget: u64,
    /// Cap on the merged cross-model read used by shared mode.
    pub shared_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::Memory,
            path: "~/.unisyn/history.sqlite".into(),
            message_limit: 50,
            token_budget: 4000,
            shared_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    pub default_session: String,
    pub default_model: String,
    pub max_models: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_session: "default".into(),
            default_model: "unisyn-auto".into(),
            max_models: 4,
            temperature: 0.7,
            max_tokens: 200,
        }
    }
}

/// A model descriptor as written in config.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelEntry {
    pub key: String,
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Per-mode system prompt overrides. Unset modes keep the built-in text.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptsConfig {
    pub solo: Option<String>,
    pub multi_isolated: Option<String>,
    pub multi_shared: Option<String>,
}
