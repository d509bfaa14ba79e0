//! Settings storage
//!
//! Manages persistence of user preferences: the last model reference, the
//! last staged copy, and generation/rendering knobs.

use crate::storage::{get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Last model reference as entered or picked by the user
    #[serde(default)]
    pub model_reference: Option<String>,
    /// Opaque content handle from the last picker grant
    #[serde(default)]
    pub model_handle: Option<String>,
    /// Private-storage copy produced by the last staging
    #[serde(default)]
    pub staged_model_path: Option<String>,
    /// Use the short prompt wrapper instead of the full instructional template
    #[serde(default)]
    pub minimal_prompt: bool,
    /// Escape non-HTML model output into a preformatted document
    #[serde(default = "default_plaintext_fallback")]
    pub plaintext_fallback: bool,
    /// Maximum number of tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Preview theme: "light" or "dark"
    #[serde(default = "default_theme")]
    pub theme: String,
}

fn default_plaintext_fallback() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    crate::pipeline::prompt::MAX_TOKENS
}

fn default_theme() -> String {
    "light".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_reference: None,
            model_handle: None,
            staged_model_path: None,
            minimal_prompt: false,
            plaintext_fallback: default_plaintext_fallback(),
            max_tokens: default_max_tokens(),
            theme: default_theme(),
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        // Floor matches the engine's generation floor; cap keeps one
        // generation inside the default context window.
        self.max_tokens = self.max_tokens.clamp(16, 4096);

        if self.theme != "light" && self.theme != "dark" {
            self.theme = default_theme();
        }

        if let Some(reference) = &self.model_reference {
            if reference.trim().is_empty() {
                self.model_reference = None;
            }
        }
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> AppSettings {
    match load_settings_internal() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

/// Internal settings loading with error propagation
fn load_settings_internal() -> Result<AppSettings, StorageError> {
    let path = get_settings_path()?;

    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(&path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from disk");
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<(), StorageError> {
    let path = get_settings_path()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to disk");
    Ok(())
}
