use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::schedule::{Schedule, SupporterConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feeds: FeedConfig,
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub supporters: SupporterConfig,
    /// Ordered; the first matching schedule wins.
    pub schedules: Vec<Schedule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub request_timeout_seconds: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    /// Deliver articles found during the very first cycle.
    pub send_first_cycle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Log expected fetch and parse failures per link.
    pub link_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:` URI of the durable store. Unset means databaseless.
    pub uri: Option<String>,
    pub max_connections: u32,
}

/// Immutable per-cycle settings handed to the pipeline with every batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CycleConfig {
    pub send_first_cycle: bool,
    pub log_link_errors: bool,
    pub database_uri: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 15,
            max_redirects: 5,
            user_agent: "feedrelay/0.1".to_string(),
            send_first_cycle: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            link_errors: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: None,
            max_connections: 5,
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            send_first_cycle: false,
            log_link_errors: true,
            database_uri: None,
        }
    }
}

impl AppConfig {
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("feedrelay").join("config.json"))
    }

    /// Loads the user config, or falls back to (and tries to write) the defaults.
    pub fn load() -> Self {
        let loaded = Self::config_file_path().and_then(|path| Self::load_from(&path));
        match loaded {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load config, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "failed to save default config");
                }
                default_config
            }
        }
    }

    /// Like [`AppConfig::load`] but never writes a default file.
    pub fn load_or_default() -> Self {
        match Self::config_file_path() {
            Ok(path) => Self::load_from_or_default(&path),
            Err(e) => {
                warn!(error = %e, "no config location, using defaults");
                Self::default()
            }
        }
    }

    /// Reads `path`, or returns the defaults when it is missing or unreadable.
    pub fn load_from_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }
        Self::load_from(path).unwrap_or_else(|e| {
            warn!(error = %e, path = %path.display(), "failed to load config, using defaults");
            Self::default()
        })
    }

    /// Reads `path`, falling back to `<path>.tmp` when the main file is corrupt.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        read_json_with_tmp_fallback(path)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a half written config
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            send_first_cycle: self.feeds.send_first_cycle,
            log_link_errors: self.log.link_errors,
            database_uri: self.database.uri.clone(),
        }
    }
}

fn read_json_with_tmp_fallback<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = std::fs::read(path)?;
    match serde_json::from_slice::<T>(&bytes) {
        Ok(v) => Ok(v),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
            let tmp = path.with_extension("json.tmp");
            let tmp_bytes = std::fs::read(&tmp).map_err(|_| ConfigError::Json(e))?;
            Ok(serde_json::from_slice::<T>(&tmp_bytes)?)
        }
    }
}
