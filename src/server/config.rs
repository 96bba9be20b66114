//! Server configuration.

use std::env;
use std::path::PathBuf;

use crate::chat::config::{ConfigError, ConfigResult};
use crate::llm::OllamaSettings;
use crate::llm::ollama::{DEFAULT_MODEL, DEFAULT_OLLAMA_URL};

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default messages per history page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default number of past messages included in a prompt.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Settings for the assistant service.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
    /// Database file.
    pub sqlite_path: PathBuf,
    /// Ollama base URL.
    pub ollama_url: String,
    /// Model name.
    pub model: String,
    /// Messages per history page.
    pub page_size: u32,
    /// Past messages included in a prompt.
    pub history_window: usize,
    /// How long Ollama keeps the model loaded.
    pub keep_alive: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            sqlite_path: PathBuf::from("scriptdesk.db"),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            history_window: DEFAULT_HISTORY_WINDOW,
            keep_alive: "1h".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `SCRIPTDESK_*` environment variables.
    ///
    /// Unparseable numeric values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = env::var("SCRIPTDESK_PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        if let Ok(path) = env::var("SCRIPTDESK_DB") {
            config.sqlite_path = PathBuf::from(path);
        }
        if let Ok(url) = env::var("SCRIPTDESK_OLLAMA_URL") {
            config.ollama_url = url;
        }
        if let Ok(model) = env::var("SCRIPTDESK_MODEL") {
            config.model = model;
        }
        if let Some(size) = env::var("SCRIPTDESK_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.page_size = size;
        }
        config
    }

    /// Check the configuration.
    ///
    /// # Errors
    /// Returns an error when the Ollama URL does not parse or a size is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        url::Url::parse(&self.ollama_url).map_err(|source| ConfigError::Url {
            field: "ollama_url",
            source,
        })?;

        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size", "must be > 0".to_string()));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model", "must not be empty".to_string()));
        }

        Ok(())
    }

    /// Generator settings derived from this configuration.
    #[must_use]
    pub fn ollama_settings(&self) -> OllamaSettings {
        OllamaSettings {
            base_url: self.ollama_url.clone(),
            model: self.model.clone(),
            keep_alive: self.keep_alive.clone(),
            ..OllamaSettings::default()
        }
    }
}
