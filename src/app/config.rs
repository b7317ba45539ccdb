use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const APP_DIR_NAME: &str = ".adb_manager_pro";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdbSettings {
    pub command_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSettings {
    pub timeout_secs: u64,
    pub max_concurrent_tasks: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            max_concurrent_tasks: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    pub max_lines: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_lines: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BundleSettings {
    /// Parent directory for per-install scratch dirs; empty means the system temp dir.
    pub temp_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub command: CommandSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub bundle: BundleSettings,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            adb: AdbSettings::default(),
            command: CommandSettings::default(),
            logging: LoggingSettings::default(),
            bundle: BundleSettings::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    pub fn bundle_temp_root(&self) -> Option<PathBuf> {
        let trimmed = self.bundle.temp_root.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADB_MANAGER_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    app_data_dir().join("config.json")
}

pub fn backup_config_path() -> PathBuf {
    config_path().with_extension("backup.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn save_config(config: &AppConfig, trace_id: &str) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), trace_id))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

pub fn validate_config(mut config: AppConfig) -> AppConfig {
    if !(1..=600).contains(&config.command.timeout_secs) {
        config.command.timeout_secs = DEFAULT_COMMAND_TIMEOUT_SECS;
    }
    if config.command.max_concurrent_tasks == 0 {
        config.command.max_concurrent_tasks = 4;
    }
    if config.logging.max_lines < 100 {
        config.logging.max_lines = 1000;
    }
    if config.logging.level.trim().is_empty() {
        config.logging.level = "info".to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("tmp");
        let config = load_config_from_path(&tmp.path().join("nope.json"), "t").expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.command.timeout_secs, 30);
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"adb":{"command_path":"/opt/pt/adb"}}"#).expect("write");
        let config = load_config_from_path(&path, "t").expect("load");
        assert_eq!(config.adb.command_path, "/opt/pt/adb");
        assert_eq!(config.logging.max_lines, 1000);
        assert!(config.bundle_temp_root().is_none());
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.command.timeout_secs = 0;
        config.command.max_concurrent_tasks = 0;
        config.logging.max_lines = 5;
        config.logging.level = "  ".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.command.timeout_secs, 30);
        assert_eq!(validated.command.max_concurrent_tasks, 4);
        assert_eq!(validated.logging.max_lines, 1000);
        assert_eq!(validated.logging.level, "info");
    }

    #[test]
    fn save_keeps_a_backup_of_the_previous_file() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        let backup = tmp.path().join("config.backup.json");
        let mut config = AppConfig::default();
        save_config_to_path(&config, &path, &backup, "t").expect("save 1");
        config.command.timeout_secs = 45;
        save_config_to_path(&config, &path, &backup, "t").expect("save 2");

        let current = load_config_from_path(&path, "t").expect("current");
        let previous = load_config_from_path(&backup, "t").expect("previous");
        assert_eq!(current.command.timeout_secs, 45);
        assert_eq!(previous.command.timeout_secs, 30);
    }

    #[test]
    fn unparseable_config_is_an_error() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(&path, "{not json").expect("write");
        let err = load_config_from_path(&path, "trace-x").unwrap_err();
        assert_eq!(err.code, "ERR_SYSTEM");
        assert_eq!(err.trace_id, "trace-x");
    }
}
