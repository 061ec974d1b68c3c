use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult};

const CONFIG_DIR_NAME: &str = "batch-uploader";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Comma-separated accept patterns: `.csv`, `text/*`, `application/json`
    pub accept: String,
    pub multiple: bool,
    pub max_size_mb: u64,
    pub max_files: usize,
    /// Without an endpoint the uploader only tracks the selection
    pub upload_url: Option<String>,
    /// Presentation only
    pub compact: bool,
    pub request_timeout_secs: u64,
    pub log_level: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            accept: ".csv".to_string(),
            multiple: true,
            max_size_mb: 100,
            max_files: 50,
            upload_url: None,
            compact: false,
            request_timeout_secs: 120,
            log_level: "info".to_string(),
        }
    }
}

impl UploaderConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(CONFIG_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

/// Load the config from the platform config directory, creating it on first use
pub fn load_config() -> AppResult<UploaderConfig> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &Path) -> AppResult<UploaderConfig> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: UploaderConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!(
                "Failed to parse config file {}: {}. Using defaults.",
                config_path.display(),
                e
            );
            UploaderConfig::default()
        });

        validate_config(&config)?;

        Ok(config)
    } else {
        let default_config = UploaderConfig::default();
        save_config_to(&default_config, config_path)?;
        Ok(default_config)
    }
}

pub fn save_config(config: &UploaderConfig) -> AppResult<()> {
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &UploaderConfig, config_path: &Path) -> AppResult<()> {
    validate_config(config)?;

    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &UploaderConfig) -> AppResult<()> {
    if config.max_size_mb == 0 {
        return Err(AppError::validation(
            "max_size_mb",
            "Must be greater than 0",
        ));
    }

    if config.max_files == 0 {
        return Err(AppError::validation("max_files", "Must be greater than 0"));
    }

    if config.request_timeout_secs == 0 || config.request_timeout_secs > 3600 {
        return Err(AppError::validation(
            "request_timeout_secs",
            "Must be between 1 and 3600",
        ));
    }

    if let Some(url) = &config.upload_url {
        validate_upload_url(url)?;
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

pub fn validate_upload_url(url: &str) -> AppResult<()> {
    let trimmed = url.trim();

    if trimmed.is_empty() {
        return Err(AppError::validation("upload_url", "Upload URL cannot be empty"));
    }

    let url_pattern = Regex::new(r"^https?://[^\s/$.?#][^\s]*$")
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !url_pattern.is_match(trimmed) {
        return Err(AppError::validation(
            "upload_url",
            "Must be an http:// or https:// URL",
        ));
    }

    if trimmed.len() > 2048 {
        return Err(AppError::validation("upload_url", "Upload URL too long"));
    }

    Ok(())
}
