use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::priority::LaneConfig;

/// Environment setting for the functor deadline warning.
pub const FUNCTOR_TIMEOUT_VAR: &str = "SPDB_FUNCTOR_TIMEOUT_MS";
/// Environment setting for the slow single-node functor threshold.
pub const FUNCTOR_WARNING_VAR: &str = "SPDB_FUNCTOR_WARNING_MS";
/// Environment setting for the slow query threshold.
pub const QUERY_WARNING_VAR: &str = "SPDB_QUERY_WARNING_MS";

/// Timing and concurrency settings for functor runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// A run still going after this long gets a warning naming its thread.
    pub functor_timeout_ms: u64,
    /// Single-node runs at or above this are logged as slow.
    pub functor_warning_ms: u64,
    /// Query runs at or above this are logged as slow.
    pub query_warning_ms: u64,
    pub lanes: LaneConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            functor_timeout_ms: 60_000,
            functor_warning_ms: 10_000,
            query_warning_ms: 30_000,
            lanes: LaneConfig::default(),
        }
    }
}

impl ExecConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for missing
    /// or malformed values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            functor_timeout_ms: millis_setting(&lookup, FUNCTOR_TIMEOUT_VAR, defaults.functor_timeout_ms),
            functor_warning_ms: millis_setting(&lookup, FUNCTOR_WARNING_VAR, defaults.functor_warning_ms),
            query_warning_ms: millis_setting(&lookup, QUERY_WARNING_VAR, defaults.query_warning_ms),
            lanes: defaults.lanes,
        }
    }

    pub fn functor_timeout(&self) -> Duration {
        Duration::from_millis(self.functor_timeout_ms)
    }

    pub fn functor_warning(&self) -> Duration {
        Duration::from_millis(self.functor_warning_ms)
    }

    pub fn query_warning(&self) -> Duration {
        Duration::from_millis(self.query_warning_ms)
    }
}

/// Read a positive millisecond setting.
///
/// Unset settings quietly use `default`. Values that are not integers, or
/// are zero or negative, are logged and also use `default`.
pub fn millis_setting(lookup: impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(ms) if ms > 0 => ms as u64,
        Ok(ms) => {
            warn!(setting = name, value = ms, default, "setting must be positive; using default");
            default
        }
        Err(e) => {
            warn!(setting = name, value = %raw, default, error = %e, "malformed setting; using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let c = ExecConfig::default();
        assert_eq!(c.functor_timeout(), Duration::from_secs(60));
        assert_eq!(c.functor_warning(), Duration::from_secs(10));
        assert_eq!(c.query_warning(), Duration::from_secs(30));
        assert_eq!(c.lanes, LaneConfig::default());
    }

    #[test]
    fn lookup_overrides() {
        let c = ExecConfig::from_lookup(lookup(&[
            (FUNCTOR_TIMEOUT_VAR, "5000"),
            (QUERY_WARNING_VAR, " 250 "),
        ]));
        assert_eq!(c.functor_timeout_ms, 5000);
        assert_eq!(c.functor_warning_ms, 10_000);
        assert_eq!(c.query_warning_ms, 250);
    }

    #[test]
    fn malformed_and_non_positive_values_fall_back() {
        let c = ExecConfig::from_lookup(lookup(&[
            (FUNCTOR_TIMEOUT_VAR, "soon"),
            (FUNCTOR_WARNING_VAR, "-5"),
            (QUERY_WARNING_VAR, "0"),
        ]));
        assert_eq!(c, ExecConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c: ExecConfig = toml::from_str(
            r#"
            functor_timeout_ms = 1000

            [lanes]
            low = 1
            "#,
        )
        .unwrap();
        assert_eq!(c.functor_timeout_ms, 1000);
        assert_eq!(c.query_warning_ms, 30_000);
        assert_eq!(c.lanes, LaneConfig { high: 16, medium: 8, low: 1 });
    }
}
