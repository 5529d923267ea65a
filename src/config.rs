use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::agent::assembler::HistoryWindow;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Runtime settings, read from the environment after `.env` is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub gateway: GatewayConfig,
    pub history_window: HistoryWindow,
    /// When set, turns go through a remote `/api/chat` instead of the model directly.
    pub remote_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => v.parse().with_context(|| format!("Invalid PORT: {}", v))?,
            None => DEFAULT_PORT,
        };

        // Defaults to ~/.persona-chat/store.db
        let db_path = match get("CHAT_DB_PATH") {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from(get("HOME").unwrap_or_else(|| ".".into()))
                .join(".persona-chat")
                .join("store.db"),
        };

        let history_window = match get("CHAT_HISTORY_WINDOW") {
            Some(v) => HistoryWindow::new(
                v.parse()
                    .with_context(|| format!("Invalid CHAT_HISTORY_WINDOW: {}", v))?,
            ),
            None => HistoryWindow::DEFAULT,
        };

        Ok(Self {
            port,
            db_path,
            gateway: GatewayConfig {
                api_key: get("OPENAI_API_KEY"),
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
                model: get("CHAT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            },
            history_window,
            remote_url: get("CHAT_REMOTE_URL"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/me")]).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.db_path, PathBuf::from("/home/me/.persona-chat/store.db"));
        assert_eq!(config.gateway.model, "gpt-4o");
        assert_eq!(config.history_window, HistoryWindow::DEFAULT);
        assert!(config.gateway.api_key.is_none());
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("CHAT_DB_PATH", "/tmp/chat.db"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CHAT_MODEL", "gpt-4o-mini"),
            ("CHAT_HISTORY_WINDOW", "4"),
            ("CHAT_REMOTE_URL", ""),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("/tmp/chat.db"));
        assert_eq!(config.gateway.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.gateway.model, "gpt-4o-mini");
        assert_eq!(config.history_window.size(), 4);
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_invalid_numbers_are_errors() {
        assert!(config(&[("PORT", "http")]).is_err());
        assert!(config(&[("CHAT_HISTORY_WINDOW", "-1")]).is_err());
    }
}
