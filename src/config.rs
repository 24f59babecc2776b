use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::models::Config;

/// Upper bound on automatic persist retries; more needs the user to confirm again.
pub const MAX_PERSIST_RETRIES: u8 = 1;

/// ConfigManager handles loading, saving, and updating engine configuration.
///
/// Saved files may be partial or hold values of the wrong type; every field
/// that cannot be read falls back to its default.
pub struct ConfigManager {
    config: RwLock<Config>,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager, loading `config_path` if it exists.
    ///
    /// # Returns
    /// * `Ok(ConfigManager)` - A new ConfigManager instance
    /// * `Err(String)` - If the file exists but cannot be read or parsed
    pub fn new(config_path: PathBuf) -> Result<Self, String> {
        let config = Self::load_from_file(&config_path)?;
        Ok(Self {
            config: RwLock::new(config),
            config_path,
        })
    }

    /// Platform config location: `{config_dir}/foldertree/config.json`.
    pub fn default_path() -> Result<PathBuf, String> {
        dirs::config_dir()
            .map(|dir| dir.join("foldertree").join("config.json"))
            .ok_or_else(|| "Could not determine config directory".to_string())
    }

    fn load_from_file(path: &Path) -> Result<Config, String> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        merge_config_with_defaults(&content)
    }

    /// Gets a clone of the current configuration.
    pub fn get(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Updates the configuration using a closure.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut config);
        config.persist_retry_limit = config.persist_retry_limit.min(MAX_PERSIST_RETRIES);
    }

    /// Saves the configuration to disk immediately, creating parent
    /// directories as needed.
    pub fn save_sync(&self) -> Result<(), String> {
        let config = self.get();

        let content = serde_json::to_string_pretty(&config)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
        fs::write(&self.config_path, content)
            .map_err(|e| format!("Failed to write config file: {}", e))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Merges a partial config JSON with defaults.
///
/// # Returns
/// * `Ok(Config)` - The merged configuration
/// * `Err(String)` - If the text is not JSON
pub fn merge_config_with_defaults(partial_json: &str) -> Result<Config, String> {
    if partial_json.trim().is_empty() {
        return Ok(Config::default());
    }

    let json_value: serde_json::Value = serde_json::from_str(partial_json)
        .map_err(|e| format!("Failed to parse config: {}", e))?;

    let mut config = Config::default();

    if let Some(obj) = json_value.as_object() {
        if let Some(v) = obj.get("client_root_pattern").and_then(|v| v.as_str()) {
            config.client_root_pattern = v.to_string();
        }
        if let Some(v) = obj.get("persist_retry_limit").and_then(|v| v.as_u64()) {
            config.persist_retry_limit = v.min(u64::from(MAX_PERSIST_RETRIES)) as u8;
        }
        if let Some(v) = obj.get("persist_timeout_ms").and_then(|v| v.as_u64()) {
            config.persist_timeout_ms = v;
        }
        if let Some(v) = obj.get("verify_invariants").and_then(|v| v.as_bool()) {
            config.verify_invariants = v;
        }
        if let Some(v) = obj.get("log_filter").and_then(|v| v.as_str()) {
            config.log_filter = v.to_string();
        }
        if let Some(v) = obj.get("expand_client_roots_on_load").and_then(|v| v.as_bool()) {
            config.expand_client_roots_on_load = v;
        }
    } else {
        log::warn!("Config file is not a JSON object, using defaults");
    }

    Ok(config)
}
