use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::LapchartError;
use crate::telemetry::Dialect;

const CONFIG_DIR_NAME: &str = "lapchart";
const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_LOG_FILE: &str = "telemetrygta5.log";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Telemetry log read when no input is given on the command line
    pub log_path: PathBuf,
    /// Directory exports are written to
    pub export_dir: PathBuf,
    /// Keyword language of the log; detected from the content when unset
    pub dialect: Option<Dialect>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let logs_dir = dirs::document_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Logs");
        Self {
            log_path: logs_dir.join(DEFAULT_LOG_FILE),
            export_dir: logs_dir.join("Exports"),
            dialect: None,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Reads the config from the user's config directory. `Ok(None)` when it
    /// was never saved.
    pub fn from_local_file() -> Result<Option<Self>, LapchartError> {
        match Self::default_path() {
            Some(path) => Self::from_file(&path),
            None => Ok(None),
        }
    }

    pub fn from_file(config_path: &Path) -> Result<Option<Self>, LapchartError> {
        if !config_path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(config_path)
            .map_err(|e| LapchartError::ConfigIOError { source: e })?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| LapchartError::ConfigParseError {
                path: config_path.display().to_string(),
                source: e,
            })
    }

    /// Points `log_path` at `log_path`. Returns whether anything changed, so
    /// callers only write the file when needed.
    pub fn remember_log(&mut self, log_path: &Path) -> bool {
        if self.log_path == log_path {
            return false;
        }
        self.log_path = log_path.to_path_buf();
        true
    }

    pub fn save(&self) -> Result<(), LapchartError> {
        let config_path = Self::default_path().ok_or(LapchartError::NoConfigDir)?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), LapchartError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LapchartError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| LapchartError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| LapchartError::ConfigSerializeError { source: e })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded = AppConfig::from_file(&dir.path().join("config.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = AppConfig {
            log_path: PathBuf::from("/tmp/telemetriagta5.txt"),
            export_dir: PathBuf::from("/tmp/exports"),
            dialect: Some(Dialect::Spanish),
        };
        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::from_file(&path).unwrap(), Some(config));
    }

    #[test]
    fn test_remember_log_and_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        let log = dir.path().join("telemetrygta5.log");

        assert!(config.remember_log(&log));
        assert!(!config.remember_log(&log));
        config.save_to(&path).unwrap();

        let reloaded = AppConfig::from_file(&path).unwrap().unwrap();
        assert_eq!(reloaded.log_path, log);
        assert_eq!(reloaded.export_dir, AppConfig::default().export_dir);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"dialect":"English"}"#).unwrap();
        let config = AppConfig::from_file(&path).unwrap().unwrap();
        assert_eq!(config.dialect, Some(Dialect::English));
        assert_eq!(config.log_path, AppConfig::default().log_path);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            AppConfig::from_file(&path),
            Err(LapchartError::ConfigParseError { .. })
        ));
    }
}
