use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AuditError, Result};

pub const DEFAULT_DB_PATH: &str = "data/audit.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::with_path(DEFAULT_DB_PATH)
    }
}

impl LedgerConfig {
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
        }
    }

    /// Load configuration from `AUDIT_*` environment variables.
    pub fn load() -> Result<Self> {
        let db_path = env::var("AUDIT_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let busy_timeout_ms = parse_env("AUDIT_BUSY_TIMEOUT_MS", DEFAULT_BUSY_TIMEOUT_MS)?;
        let max_connections = parse_env("AUDIT_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let acquire_timeout_ms = parse_env("AUDIT_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT_MS)?;

        let config = LedgerConfig {
            db_path: PathBuf::from(db_path),
            busy_timeout_ms,
            max_connections,
            acquire_timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML/YAML/JSON file, with `AUDIT_*` environment variables taking precedence.
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("db_path", DEFAULT_DB_PATH)?
            .set_default("busy_timeout_ms", DEFAULT_BUSY_TIMEOUT_MS as i64)?
            .set_default("max_connections", DEFAULT_MAX_CONNECTIONS as i64)?
            .set_default("acquire_timeout_ms", DEFAULT_ACQUIRE_TIMEOUT_MS as i64)?
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("AUDIT"))
            .build()?;

        let config: LedgerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(AuditError::ConfigError("db_path must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(AuditError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AuditError::ConfigError(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(default),
    }
}
