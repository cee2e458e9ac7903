//! Poller configuration (§6): one field per row of the options table.

use crate::error::{Result, ScrobbleError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-source poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Base sleep between cycles, in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound for the adaptive backoff floor; never back off once
    /// `interval_secs >= max_interval_secs`.
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
    /// Size of the recent-window used by the reconciler (§4.2 `W`).
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Threshold defining "close to interval", in seconds.
    #[serde(default = "default_close_threshold_secs")]
    pub close_threshold_secs: u64,
    /// Delay applied when close-to-interval fires, in seconds.
    #[serde(default = "default_close_delay_secs")]
    pub close_delay_secs: u64,
    /// `checkCount` threshold that enables backoff.
    #[serde(default = "default_quiet_cycle_threshold")]
    pub quiet_cycle_threshold: u32,
    /// Multiplier applied to `interval` when backing off.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u64,
    /// Upper cap for backed-off sleep, in seconds.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Minutes-quiet multiplier triggering backoff.
    #[serde(default = "default_backoff_trigger_factor")]
    pub backoff_trigger_factor: u64,
}

const fn default_interval_secs() -> u64 {
    30
}
const fn default_max_interval_secs() -> u64 {
    600
}
const fn default_window_size() -> usize {
    20
}
const fn default_close_threshold_secs() -> u64 {
    5
}
const fn default_close_delay_secs() -> u64 {
    10
}
const fn default_quiet_cycle_threshold() -> u32 {
    5
}
const fn default_backoff_factor() -> u64 {
    5
}
const fn default_backoff_cap_secs() -> u64 {
    300
}
const fn default_backoff_trigger_factor() -> u64 {
    10
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_interval_secs: default_max_interval_secs(),
            window_size: default_window_size(),
            close_threshold_secs: default_close_threshold_secs(),
            close_delay_secs: default_close_delay_secs(),
            quiet_cycle_threshold: default_quiet_cycle_threshold(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_secs: default_backoff_cap_secs(),
            backoff_trigger_factor: default_backoff_trigger_factor(),
        }
    }
}

impl PollerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs)
    }

    #[must_use]
    pub const fn close_threshold(&self) -> Duration {
        Duration::from_secs(self.close_threshold_secs)
    }

    #[must_use]
    pub const fn close_delay(&self) -> Duration {
        Duration::from_secs(self.close_delay_secs)
    }

    /// Validates the configuration, rejecting combinations that would make
    /// the adaptive-backoff law (§8) or close-to-interval rule meaningless.
    ///
    /// # Errors
    ///
    /// Returns `ScrobbleError::ConfigInvalid` if `interval_secs` is zero, or
    /// if `max_interval_secs` is smaller than `interval_secs`.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(ScrobbleError::ConfigInvalid {
                message: "interval must be greater than zero".to_string(),
            });
        }
        if self.max_interval_secs < self.interval_secs {
            return Err(ScrobbleError::ConfigInvalid {
                message: "max_interval must be >= interval".to_string(),
            });
        }
        Ok(())
    }
}

/// Process-wide configuration: one `PollerConfig` per source, plus the set
/// of downstream scrobble clients shared by all pollers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrobbleConfig {
    /// Per-source poller configuration, keyed by source name.
    #[serde(default)]
    pub sources: HashMap<String, PollerConfig>,
    /// Downstream scrobble-client identifiers, shared across all sources.
    #[serde(default)]
    pub clients: Vec<String>,
}

impl ScrobbleConfig {
    /// Parses a `ScrobbleConfig` from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `ScrobbleError::ConfigParseError` if `text` is not valid TOML
    /// matching this shape.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        for (name, poller) in &config.sources {
            poller.validate().map_err(|e| ScrobbleError::ConfigInvalid {
                message: format!("source {name}: {e}"),
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_spec_table() {
        let config = PollerConfig::default();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.max_interval_secs, 600);
        assert_eq!(config.window_size, 20);
        assert_eq!(config.close_threshold_secs, 5);
        assert_eq!(config.close_delay_secs, 10);
        assert_eq!(config.quiet_cycle_threshold, 5);
        assert_eq!(config.backoff_factor, 5);
        assert_eq!(config.backoff_cap_secs, 300);
        assert_eq!(config.backoff_trigger_factor, 10);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = PollerConfig {
            interval_secs: 0,
            ..PollerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_max_below_interval() {
        let config = PollerConfig {
            interval_secs: 100,
            max_interval_secs: 50,
            ..PollerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_minimal_toml_uses_defaults() {
        let toml_str = r#"
clients = ["client-a"]

[sources.lastfm]
"#;
        let config = ScrobbleConfig::parse(toml_str).unwrap_or_default();
        let lastfm = config.sources.get("lastfm").cloned().unwrap_or_default();
        assert_eq!(lastfm.interval_secs, 30);
        assert_eq!(config.clients, vec!["client-a".to_string()]);
    }

    #[test]
    fn test_parse_rejects_invalid_source_config() {
        let toml_str = r#"
[sources.lastfm]
interval_secs = 0
"#;
        assert!(ScrobbleConfig::parse(toml_str).is_err());
    }
}
