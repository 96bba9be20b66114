//! Client configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::page_cache::DEFAULT_CAPACITY;

/// Default base URL of the assistant service.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A URL did not parse.
    #[error("invalid URL for {field}: {source}")]
    Url {
        /// Offending field.
        field: &'static str,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// A value was out of range.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Result alias for configuration checks.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the chat client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the assistant service.
    pub base_url: String,
    /// Timeout for non-streaming requests.
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Longest gap allowed between two chunks of a reply.
    #[serde(with = "duration_ms")]
    pub stream_idle_timeout: Duration,
    /// Pages kept in the page cache.
    pub page_cache_capacity: usize,
    /// Quiet window before notes are saved.
    #[serde(with = "duration_ms")]
    pub notes_quiet_window: Duration,
    /// Where client preferences are stored.
    pub preferences_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(120),
            page_cache_capacity: DEFAULT_CAPACITY,
            notes_quiet_window: Duration::from_millis(800),
            preferences_path: PathBuf::from("scriptdesk-prefs.json"),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `SCRIPTDESK_API_URL` and `SCRIPTDESK_PREFS_PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var("SCRIPTDESK_API_URL") {
            config.base_url = url;
        }
        if let Ok(path) = env::var("SCRIPTDESK_PREFS_PATH") {
            config.preferences_path = PathBuf::from(path);
        }
        config
    }

    /// Set the service URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the idle timeout for streamed replies.
    #[must_use]
    pub const fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the page cache capacity.
    #[must_use]
    pub const fn with_page_cache_capacity(mut self, capacity: usize) -> Self {
        self.page_cache_capacity = capacity;
        self
    }

    /// Set the notes quiet window.
    #[must_use]
    pub const fn with_notes_quiet_window(mut self, window: Duration) -> Self {
        self.notes_quiet_window = window;
        self
    }

    /// Set the preferences file.
    #[must_use]
    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_path = path.into();
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL does not parse or a size/timeout is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        url::Url::parse(&self.base_url).map_err(|source| ConfigError::Url {
            field: "base_url",
            source,
        })?;

        if self.page_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "page_cache_capacity",
                "must be > 0".to_string(),
            ));
        }

        for (field, value) in [
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("stream_idle_timeout", self.stream_idle_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(field, "must be > 0".to_string()));
            }
        }

        Ok(())
    }
}

/// Durations as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_cache_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::default()
            .with_base_url("http://example.test:9000")
            .with_stream_idle_timeout(Duration::from_secs(5))
            .with_notes_quiet_window(Duration::from_millis(250));

        assert_eq!(config.base_url, "http://example.test:9000");
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(5));
        assert_eq!(config.notes_quiet_window, Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ClientConfig::default().with_base_url("not a url");
        assert!(matches!(config.validate(), Err(ConfigError::Url { .. })));

        let config = ClientConfig::default().with_page_cache_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid("page_cache_capacity", _))
        ));

        let config = ClientConfig::default().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = ClientConfig::default().with_notes_quiet_window(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["notes_quiet_window"], 1500);

        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.notes_quiet_window, Duration::from_millis(1500));
    }
}
