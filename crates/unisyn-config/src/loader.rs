use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Config, OpenRouterConfig};

/// Public OpenRouter chat-completions endpoint.
pub const DEFAULT_OPENROUTER_BASE: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// Find the config file by searching standard locations.
pub fn find_config_path() -> PathBuf {
    // 1. Current directory
    let local = Path::new("config.json");
    if local.exists() {
        return local.to_path_buf();
    }

    // 2. ~/.unisyn/config.json
    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".unisyn").join("config.json");
        if home_config.exists() {
            return home_config;
        }
    }

    // Default: ~/.unisyn/config.json (will use defaults if missing)
    dirs::home_dir()
        .map(|h| h.join(".unisyn").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Load configuration from a JSON file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Resolve the OpenRouter API key from config, falling back to `OPENROUTER_API_KEY`.
pub fn resolve_api_key(cfg: &OpenRouterConfig) -> Option<String> {
    cfg.api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| {
            std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
        })
}

/// Resolve the chat-completions URL: config, then `OPENROUTER_BASE_URL`, then the public endpoint.
pub fn resolve_api_base(cfg: &OpenRouterConfig) -> String {
    cfg.api_base
        .clone()
        .filter(|b| !b.is_empty())
        .or_else(|| {
            std::env::var("OPENROUTER_BASE_URL")
                .ok()
                .filter(|b| !b.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_OPENROUTER_BASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.gateway.port, 8000);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gateway":{"port":9001},"chat":{"maxModels":2}}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.port, 9001);
        assert_eq!(cfg.gateway.host, "0.0.0.0");
        assert_eq!(cfg.chat.max_models, 2);
    }

    #[test]
    fn test_load_malformed_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_expand_home_plain_path() {
        assert_eq!(expand_home("/tmp/x.sqlite"), PathBuf::from("/tmp/x.sqlite"));
    }

    #[test]
    fn test_expand_home_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/a/b"), home.join("a/b"));
        }
    }

    #[test]
    fn test_config_values_win_over_env() {
        let cfg = OpenRouterConfig {
            api_key: Some("sk-from-config".into()),
            api_base: Some("http://127.0.0.1:9/v1/chat".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&cfg).as_deref(), Some("sk-from-config"));
        assert_eq!(resolve_api_base(&cfg), "http://127.0.0.1:9/v1/chat");
    }
}
