//! Server configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::severity::{Severity, SeverityRules};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24 * 7;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("could not determine data directory")]
    NoDataDir,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid severity rules: {0}")]
    Rules(#[from] toml::de::Error),

    #[error("severity tier {0} contains an empty keyword")]
    EmptyKeyword(Severity),

    #[error("unknown severity: {0:?}")]
    UnknownSeverity(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// SQLite database file (from CIVIC_DATABASE)
    pub database: PathBuf,
    /// Directory uploaded photos are written to (from CIVIC_UPLOAD_DIR)
    pub upload_dir: PathBuf,
    /// Allowed CORS origins (from CIVIC_CORS_ORIGINS, comma-separated).
    /// `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    /// Optional TOML file overriding the built-in keyword lists
    pub severity_rules: Option<PathBuf>,
    pub session_ttl_hours: i64,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, so tests don't need to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match (lookup("CIVIC_DATABASE"), lookup("CIVIC_UPLOAD_DIR")) {
            (Some(_), Some(_)) => None,
            _ => Some(default_data_dir()?),
        };

        let database = lookup("CIVIC_DATABASE")
            .map(PathBuf::from)
            .or_else(|| data_dir.as_ref().map(|d| d.join("civic.db")))
            .ok_or(ConfigError::NoDataDir)?;
        let upload_dir = lookup("CIVIC_UPLOAD_DIR")
            .map(PathBuf::from)
            .or_else(|| data_dir.as_ref().map(|d| d.join("uploads")))
            .ok_or(ConfigError::NoDataDir)?;

        let cors_origins = lookup("CIVIC_CORS_ORIGINS").map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Ok(Self {
            host: lookup("CIVIC_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "CIVIC_PORT", DEFAULT_PORT)?,
            database,
            upload_dir,
            cors_origins,
            severity_rules: lookup("CIVIC_SEVERITY_RULES").map(PathBuf::from),
            session_ttl_hours: parse_or(&lookup, "CIVIC_SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)?,
            max_upload_bytes: parse_or(&lookup, "CIVIC_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }

    /// Load the configured severity rules, or the built-in ones.
    pub fn load_rules(&self) -> Result<SeverityRules, ConfigError> {
        match &self.severity_rules {
            Some(path) => SeverityRules::load(path),
            None => Ok(SeverityRules::default()),
        }
    }
}

pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    directories::ProjectDirs::from("", "", "civic-report")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(ConfigError::NoDataDir)
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => {
            tracing::debug!("{key} not set, using default");
            Ok(default)
        }
    }
}
