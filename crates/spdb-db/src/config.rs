use std::time::Duration;

use serde::{Deserialize, Serialize};

use spdb_exec::{millis_setting, ExecConfig};

use crate::error::{DbError, DbResult};

/// Environment setting for the background flush interval.
pub const STORAGE_INTERVAL_VAR: &str = "SPDB_STORAGE_INTERVAL_MS";

/// Settings for a [`LocalDatabase`](crate::LocalDatabase).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// How often dirty documents are flushed to storage.
    pub storage_interval_ms: u64,
    /// Upper bound on concurrently running trigger actions.
    pub trigger_workers: usize,
    pub exec: ExecConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            storage_interval_ms: 10_000,
            trigger_workers: 512,
            exec: ExecConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`. Malformed values are logged and
    /// replaced by defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            storage_interval_ms: millis_setting(&lookup, STORAGE_INTERVAL_VAR, defaults.storage_interval_ms),
            trigger_workers: defaults.trigger_workers,
            exec: ExecConfig::from_lookup(&lookup),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> DbResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| DbError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.storage_interval_ms == 0 {
            return Err(DbError::Config("storage_interval_ms must be > 0".into()));
        }
        if self.trigger_workers == 0 {
            return Err(DbError::Config("trigger_workers must be > 0".into()));
        }
        Ok(())
    }

    pub fn storage_interval(&self) -> Duration {
        Duration::from_millis(self.storage_interval_ms)
    }
}
