//! Graph-level configuration
//!
//! Tunables a host embeds alongside its own settings: channel capacities for
//! the event bridge, the safety cap on extender growth, and the deletion
//! policy for multi-extender groups. Persisted as TOML; missing fields fall
//! back to defaults so old files keep loading.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Deletion policy for fully-disconnected managed groups beyond the
/// required minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Surplus disconnected groups stay in place once created; only an
    /// explicit removal retires them.
    #[default]
    KeepStale,

    /// Surplus disconnected groups are deleted during the normal update.
    ReclaimSurplus,
}

impl fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimPolicy::KeepStale => write!(f, "Keep Stale"),
            ReclaimPolicy::ReclaimSurplus => write!(f, "Reclaim Surplus"),
        }
    }
}

/// Configuration for a [`crate::graph::FlowGraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Bounded capacity of each event subscription channel.
    pub event_capacity: usize,

    /// Hard cap on the number of ports a single extender may manage.
    /// Growth past the cap logs a warning and stops creating ports.
    pub max_managed_ports: usize,

    /// Default deletion policy for multi-extender groups.
    pub reclaim: ReclaimPolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            max_managed_ports: 4096,
            reclaim: ReclaimPolicy::KeepStale,
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = GraphConfig::default();
        assert!(config.event_capacity > 0);
        assert!(config.max_managed_ports > 0);
        assert_eq!(config.reclaim, ReclaimPolicy::KeepStale);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GraphConfig {
            event_capacity: 64,
            max_managed_ports: 128,
            reclaim: ReclaimPolicy::ReclaimSurplus,
        };
        let text = config.to_toml().unwrap();
        let back = GraphConfig::from_toml(&text).unwrap();
        assert_eq!(back.event_capacity, 64);
        assert_eq!(back.max_managed_ports, 128);
        assert_eq!(back.reclaim, ReclaimPolicy::ReclaimSurplus);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = GraphConfig::from_toml("event_capacity = 8\n").unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(
            config.max_managed_ports,
            GraphConfig::default().max_managed_ports
        );
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(GraphConfig::from_toml("event_capacity = \"lots\"").is_err());
    }
}
