//! Engine runtime configuration.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::constants::{
    BAIT_REGEN_PERIOD_MS, CAST_COOLDOWN_SECS, FLUSH_INTERVAL_MS, INVENTORY_CAPACITY, MAX_BAIT,
};
use crate::legendary::LegendaryConfig;
use crate::scheduler::BaitSchedule;

/// Tunables that are not part of the loot tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_max_bait")]
    pub max_bait: u32,
    #[serde(default = "EngineConfig::default_regen_period_ms")]
    pub regen_period_ms: i64,
    #[serde(default = "EngineConfig::default_cooldown_secs")]
    pub cooldown_secs: u32,
    #[serde(default = "EngineConfig::default_inventory_capacity")]
    pub inventory_capacity: usize,
    #[serde(default = "EngineConfig::default_flush_interval_ms")]
    pub flush_interval_ms: i64,
    /// Run `maybe_flush` inline after each action. The async service turns
    /// this off and flushes from its own worker.
    #[serde(default = "EngineConfig::default_flush_on_action")]
    pub flush_on_action: bool,
    #[serde(default)]
    pub legendary: LegendaryConfig,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: i64,
        value: i64,
    },
    #[error("invalid loot catalog: {0}")]
    Catalog(#[from] CatalogError),
}

impl EngineConfig {
    const fn default_max_bait() -> u32 {
        MAX_BAIT
    }

    const fn default_regen_period_ms() -> i64 {
        BAIT_REGEN_PERIOD_MS
    }

    const fn default_cooldown_secs() -> u32 {
        CAST_COOLDOWN_SECS
    }

    const fn default_inventory_capacity() -> usize {
        INVENTORY_CAPACITY
    }

    const fn default_flush_interval_ms() -> i64 {
        FLUSH_INTERVAL_MS
    }

    const fn default_flush_on_action() -> bool {
        true
    }

    /// Parse a partial JSON override; missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub const fn schedule(&self) -> BaitSchedule {
        BaitSchedule {
            max_bait: self.max_bait,
            regen_period_ms: self.regen_period_ms,
            cooldown_secs: self.cooldown_secs,
        }
    }

    /// Validate configuration bounds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when any field is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::at_least("max_bait", i64::from(self.max_bait), 1)?;
        Self::at_least("regen_period_ms", self.regen_period_ms, 1)?;
        Self::at_least(
            "inventory_capacity",
            i64::try_from(self.inventory_capacity).unwrap_or(i64::MAX),
            1,
        )?;
        Self::at_least("flush_interval_ms", self.flush_interval_ms, 1)?;
        Self::at_least(
            "legendary.artifact_timeout_ms",
            i64::try_from(self.legendary.artifact_timeout_ms).unwrap_or(i64::MAX),
            1,
        )?;
        Ok(())
    }

    const fn at_least(field: &'static str, value: i64, min: i64) -> Result<(), ConfigError> {
        if value < min {
            return Err(ConfigError::MinViolation { field, min, value });
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_bait: Self::default_max_bait(),
            regen_period_ms: Self::default_regen_period_ms(),
            cooldown_secs: Self::default_cooldown_secs(),
            inventory_capacity: Self::default_inventory_capacity(),
            flush_interval_ms: Self::default_flush_interval_ms(),
            flush_on_action: Self::default_flush_on_action(),
            legendary: LegendaryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
        assert_eq!(EngineConfig::default().schedule(), BaitSchedule::default());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"cooldown_secs": 5, "legendary": {"pin_duration_ms": 0}}"#).unwrap();
        assert_eq!(config.cooldown_secs, 5);
        assert_eq!(config.max_bait, MAX_BAIT);
        assert_eq!(config.legendary.pin_duration_ms, 0);
        assert!(config.flush_on_action);
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = EngineConfig {
            inventory_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MinViolation {
                field: "inventory_capacity",
                min: 1,
                value: 0,
            })
        );

        let config = EngineConfig {
            regen_period_ms: -5,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MinViolation { field: "regen_period_ms", .. })
        ));
    }
}
