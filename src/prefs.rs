//! Client-local preferences.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::error::ChatResult;

const fn default_sound_enabled() -> bool {
    true
}

/// Preferences that survive restarts. Not part of conversation state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClientPreferences {
    /// Play cues on send and receive.
    #[serde(default = "default_sound_enabled")]
    pub sound_enabled: bool,
}

impl Default for ClientPreferences {
    fn default() -> Self {
        Self {
            sound_enabled: default_sound_enabled(),
        }
    }
}

impl ClientPreferences {
    /// Load from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> ChatResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no preferences file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write to `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ChatResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
