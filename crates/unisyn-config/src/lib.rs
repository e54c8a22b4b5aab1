pub mod loader;
pub mod schema;

pub use loader::{expand_home, find_config_path, load_config, resolve_api_base, resolve_api_key};
pub use schema::{
    ChatConfig, Config, GatewayConfig, HistoryBackend, HistoryConfig, ModelEntry,
    OpenRouterConfig, PromptsConfig, ProvidersConfig,
};
