use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::broadcast::hosts::{default_hosts, HostEndpoint};
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::security::MAX_DELAY_MS;

const APP_DIR_NAME: &str = "WhatsApp Broadcaster";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub upload_attempts: u32,
    pub upload_backoff_ms: u64,
    pub upload_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub hosts: Vec<HostEndpoint>,
    pub inline_image_fallback: bool,
    pub max_image_size_mb: u64,
    pub compress_quality: u8,
    pub history_retention_days: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_delay_ms: 5000,
            poll_interval_ms: 1000,
            upload_attempts: 3,
            upload_backoff_ms: 1500,
            upload_timeout_secs: 30,
            send_timeout_secs: 30,
            hosts: default_hosts(),
            inline_image_fallback: true,
            max_image_size_mb: 16, // WhatsApp image limit
            compress_quality: 85,
            history_retention_days: 30,
            log_level: "info".to_string(),
        }
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn get_data_directory() -> AppResult<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| AppError::Config("Could not find data directory".to_string()))?
        .join(APP_DIR_NAME);

    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

pub fn load_config() -> AppResult<Config> {
    load_config_from(&get_config_path()?)
}

/// Read the config at `path`, writing defaults there if it does not exist.
/// A file that fails to parse is replaced by defaults in memory only.
pub fn load_config_from(path: &Path) -> AppResult<Config> {
    if path.exists() {
        let config_str = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            Config::default()
        });

        validate_config(&config)?;
        Ok(config)
    } else {
        let default_config = Config::default();
        write_config(path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config(config: &Config) -> AppResult<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn save_config_to(path: &Path, config: &Config) -> AppResult<()> {
    validate_config(config)?;
    write_config(path, config)
}

fn write_config(path: &Path, config: &Config) -> AppResult<()> {
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str)?;

    log::info!("Configuration saved to {}", path.display());
    Ok(())
}

pub fn validate_config(config: &Config) -> AppResult<()> {
    if config.default_delay_ms > MAX_DELAY_MS {
        return Err(AppError::validation("default_delay_ms", "Must be 600000ms or less"));
    }

    if !(100..=1000).contains(&config.poll_interval_ms) {
        return Err(AppError::validation("poll_interval_ms", "Must be between 100 and 1000"));
    }

    if config.upload_attempts == 0 || config.upload_attempts > 10 {
        return Err(AppError::validation("upload_attempts", "Must be between 1 and 10"));
    }

    if config.upload_timeout_secs == 0 || config.send_timeout_secs == 0 {
        return Err(AppError::validation("timeout", "Timeouts must be greater than 0"));
    }

    if config.hosts.is_empty() {
        return Err(AppError::validation("hosts", "At least one gateway host is required"));
    }

    for host in &config.hosts {
        if !host.base_url.starts_with("https://") && !host.base_url.starts_with("http://") {
            return Err(AppError::validation(
                "hosts",
                &format!("'{}' is not an http(s) URL", host.base_url),
            ));
        }
    }

    if config.max_image_size_mb == 0 {
        return Err(AppError::validation("max_image_size_mb", "Must be greater than 0"));
    }

    if config.compress_quality == 0 || config.compress_quality > 100 {
        return Err(AppError::validation("compress_quality", "Must be between 1 and 100"));
    }

    if config.history_retention_days == 0 {
        return Err(AppError::validation("history_retention_days", "Must be greater than 0"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

pub fn reset_config() -> AppResult<Config> {
    reset_config_at(&get_config_path()?)
}

pub fn reset_config_at(path: &Path) -> AppResult<Config> {
    let default_config = Config::default();
    write_config(path, &default_config)?;

    log::info!("Configuration reset to defaults");
    Ok(default_config)
}

/// Drop broadcast history older than the configured retention.
pub async fn auto_cleanup(database: &Database, config: &Config) -> AppResult<(u64, u64)> {
    let days = config.history_retention_days as i32;

    let sessions_cleaned = database.cleanup_old_broadcast_sessions(days).await?;
    let history_cleaned = database.cleanup_old_delivery_history(days).await?;

    log::info!(
        "Auto-cleanup completed: {} sessions, {} delivery entries cleaned",
        sessions_cleaned,
        history_cleaned
    );

    Ok((sessions_cleaned, history_cleaned))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("broadcaster_config_{}", name));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(path.with_extension("json.bak"));
        path
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[1].region_hint.as_deref(), Some("hk"));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let cases = [
            Config { poll_interval_ms: 50, ..Config::default() },
            Config { upload_attempts: 0, ..Config::default() },
            Config { default_delay_ms: MAX_DELAY_MS + 1, ..Config::default() },
            Config { hosts: Vec::new(), ..Config::default() },
            Config { hosts: vec![HostEndpoint::new("ftp://example.com")], ..Config::default() },
            Config { compress_quality: 0, ..Config::default() },
            Config { log_level: "loud".to_string(), ..Config::default() },
        ];

        for config in cases {
            assert!(
                matches!(validate_config(&config), Err(AppError::Validation { .. })),
                "expected rejection for {:?}",
                config
            );
        }
    }

    #[test]
    fn test_load_creates_defaults_then_save_backs_up() {
        let path = temp_config_path("roundtrip");

        let loaded = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(loaded.default_delay_ms, 5000);

        let changed = Config { default_delay_ms: 2000, ..loaded };
        save_config_to(&path, &changed).unwrap();
        assert!(path.with_extension("json.bak").exists());

        assert_eq!(load_config_from(&path).unwrap().default_delay_ms, 2000);
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let path = temp_config_path("partial");
        fs::write(&path, r#"{"default_delay_ms": 750}"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.default_delay_ms, 750);
        assert_eq!(config.poll_interval_ms, 1000);
        assert!(config.inline_image_fallback);
    }

    #[test]
    fn test_save_rejects_invalid_config() {
        let path = temp_config_path("invalid");
        let bad = Config { upload_attempts: 11, ..Config::default() };
        assert!(save_config_to(&path, &bad).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_reset_config_restores_defaults() {
        let path = temp_config_path("reset");
        save_config_to(&path, &Config { default_delay_ms: 10, ..Config::default() }).unwrap();

        let config = reset_config_at(&path).unwrap();
        assert_eq!(config.default_delay_ms, 5000);
        assert_eq!(load_config_from(&path).unwrap().default_delay_ms, 5000);
    }

    #[tokio::test]
    async fn test_auto_cleanup_on_empty_database() {
        let database = Database::connect_in_memory().await.unwrap();
        let cleaned = auto_cleanup(&database, &Config::default()).await.unwrap();
        assert_eq!(cleaned, (0, 0));
    }
}
