use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatcher::KeyOverride;
use crate::sort::SortState;

/// Application-level constants
pub const APP_NAME: &str = "ReviewDesk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rows per rendered page of a list view.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// How often the training monitor polls the backend.
pub const DEFAULT_TRAINING_POLL_MS: u64 = 2_000;

/// Per-user data directory: `<data_dir>/ReviewDesk`.
/// Falls back to the working directory where the platform has none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn database_path() -> PathBuf {
    app_data_dir().join("reviewdesk.db")
}

pub fn config_path() -> PathBuf {
    app_data_dir().join("config.json")
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,reviewdesk=debug"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Engine settings read from `config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub page_size: usize,
    pub training_poll_interval_ms: u64,
    pub keymap_overrides: Vec<KeyOverride>,
    pub default_sort: SortState,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            training_poll_interval_ms: DEFAULT_TRAINING_POLL_MS,
            keymap_overrides: Vec::new(),
            default_sort: SortState::default(),
        }
    }
}

impl EngineConfig {
    pub fn training_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.training_poll_interval_ms)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.training_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "training_poll_interval_ms must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}

/// Load the engine config. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let config: EngineConfig =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Action;
    use crate::models::{SortDirection, SortField};

    #[test]
    fn paths_under_app_data_dir() {
        let app = app_data_dir();
        assert!(app.ends_with("ReviewDesk"));
        assert!(database_path().starts_with(&app));
        assert!(config_path().starts_with(&app));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.3.0");
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "page_size": 20,
                "keymap_overrides": [{"keys": "ctrl+n", "action": "next"}],
                "default_sort": {"field": "priority", "direction": "asc"}
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.training_poll_interval_ms, DEFAULT_TRAINING_POLL_MS);
        assert_eq!(config.keymap_overrides[0].action, Action::Next);
        assert_eq!(config.default_sort.field, SortField::Priority);
        assert_eq!(config.default_sort.direction, SortDirection::Ascending);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ page_size: ").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn zero_page_size_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"page_size": 0}"#).unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));
    }
}
