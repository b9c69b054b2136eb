//! Ledger configuration.
//!
//! Read from `DRUMLEDGER_*` environment variables at process start; every
//! setting has a default so an empty environment opens a single-occupancy
//! ledger in `./drum_inventory.db`.

use anyhow::{Context, bail};
use serde::Deserialize;

use drumledger_inventory::OccupancyMode;

pub const ENV_DATABASE_URL: &str = "DRUMLEDGER_DATABASE_URL";
pub const ENV_OCCUPANCY: &str = "DRUMLEDGER_OCCUPANCY";
pub const ENV_GRID_CAPACITY: &str = "DRUMLEDGER_GRID_CAPACITY";
pub const ENV_MAX_CONNECTIONS: &str = "DRUMLEDGER_MAX_CONNECTIONS";
pub const ENV_BUSY_TIMEOUT_MS: &str = "DRUMLEDGER_BUSY_TIMEOUT_MS";

const IN_MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite connection URL (`sqlite://path/to/file.db` or `sqlite::memory:`).
    pub database_url: String,
    pub occupancy: OccupancyMode,
    pub max_connections: u32,
    /// How long a write waits on SQLite's database lock before reporting a conflict.
    pub busy_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://drum_inventory.db".to_string(),
            occupancy: OccupancyMode::Single,
            max_connections: 4,
            busy_timeout_ms: 250,
        }
    }
}

impl LedgerConfig {
    /// Private in-memory database on a single connection (tests, demos).
    pub fn in_memory(occupancy: OccupancyMode) -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            occupancy,
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_DATABASE_URL) {
            if url.trim().is_empty() {
                bail!("{ENV_DATABASE_URL} is set but empty");
            }
            config.database_url = url.trim().to_string();
        }

        if let Some(mode) = lookup(ENV_OCCUPANCY) {
            config.occupancy = OccupancyMode::parse_setting(&mode)
                .with_context(|| format!("invalid {ENV_OCCUPANCY}"))?;
        }

        if let Some(raw) = lookup(ENV_GRID_CAPACITY) {
            let capacity: u32 = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_GRID_CAPACITY} must be a positive integer"))?;
            match config.occupancy {
                OccupancyMode::Shared { .. } if capacity > 0 => {
                    config.occupancy = OccupancyMode::Shared {
                        capacity: Some(capacity),
                    };
                }
                OccupancyMode::Shared { .. } => bail!("{ENV_GRID_CAPACITY} must be at least 1"),
                OccupancyMode::Single => {
                    bail!("{ENV_GRID_CAPACITY} only applies when {ENV_OCCUPANCY}=shared")
                }
            }
        }

        if let Some(raw) = lookup(ENV_MAX_CONNECTIONS) {
            config.max_connections = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_CONNECTIONS} must be an integer"))?;
            if config.max_connections == 0 {
                bail!("{ENV_MAX_CONNECTIONS} must be at least 1");
            }
        }

        if let Some(raw) = lookup(ENV_BUSY_TIMEOUT_MS) {
            config.busy_timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_BUSY_TIMEOUT_MS} must be an integer"))?;
        }

        Ok(config)
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.occupancy, OccupancyMode::Single);
        assert!(!config.is_in_memory());
    }

    #[test]
    fn shared_mode_with_capacity() {
        let config = LedgerConfig::from_lookup(lookup(&[
            (ENV_OCCUPANCY, "shared"),
            (ENV_GRID_CAPACITY, "4"),
            (ENV_DATABASE_URL, "sqlite://drums.db"),
        ]))
        .unwrap();
        assert_eq!(config.occupancy, OccupancyMode::Shared { capacity: Some(4) });
        assert_eq!(config.database_url, "sqlite://drums.db");
    }

    #[test]
    fn capacity_without_shared_mode_is_rejected() {
        let err = LedgerConfig::from_lookup(lookup(&[(ENV_GRID_CAPACITY, "2")])).unwrap_err();
        assert!(err.to_string().contains(ENV_GRID_CAPACITY));
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err =
            LedgerConfig::from_lookup(lookup(&[(ENV_BUSY_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(format!("{err:#}").contains(ENV_BUSY_TIMEOUT_MS));

        let err = LedgerConfig::from_lookup(lookup(&[(ENV_MAX_CONNECTIONS, "0")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_CONNECTIONS));
    }

    #[test]
    fn deserializes_with_defaults_for_missing_fields() {
        let config: LedgerConfig = serde_json::from_str(
            r#"{ "database_url": "sqlite::memory:", "occupancy": { "mode": "shared", "capacity": null } }"#,
        )
        .unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.occupancy, OccupancyMode::Shared { capacity: None });
        assert_eq!(config.busy_timeout_ms, 250);
    }
}
