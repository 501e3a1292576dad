//! Centralized balance and tuning constants for the Reelcast reward engine.
//!
//! These values define the default math for catches, bait and persistence.
//! Runtime overrides go through [`crate::config::EngineConfig`] and
//! [`crate::catalog::LootCatalog`]; the defaults below are what ships.

// Bait pool ----------------------------------------------------------------
pub(crate) const MAX_BAIT: u32 = 10;
pub(crate) const BAIT_REGEN_PERIOD_MS: i64 = 30 * 60 * 1_000;
pub(crate) const CAST_COOLDOWN_SECS: u32 = 30;

// Weight curve -------------------------------------------------------------
pub(crate) const MIN_WEIGHT: f64 = 0.1;
pub(crate) const WEIGHT_THRESHOLD: f64 = 10.0;
pub(crate) const MAX_WEIGHT: f64 = 100.0;
pub(crate) const NORMAL_RANGE_CHANCE: f64 = 0.8;
pub(crate) const UPPER_RANGE_EXPONENT: i32 = 3;
pub(crate) const WEIGHT_DECIMALS: i32 = 2;

// Inventory ----------------------------------------------------------------
pub(crate) const INVENTORY_CAPACITY: usize = 10;

// Loot ---------------------------------------------------------------------
pub(crate) const JUNK_CHANCE: f64 = 0.10;
pub(crate) const FALLBACK_SPECIES: [&str; 2] = ["Carp", "Perch"];

// Persistence --------------------------------------------------------------
pub(crate) const FLUSH_INTERVAL_MS: i64 = 30_000;
pub(crate) const TEMP_FILE_EXTENSION: &str = "json.tmp";

// Legendary side effects ---------------------------------------------------
pub(crate) const ARTIFACT_TIMEOUT_MS: u64 = 20_000;
pub(crate) const PIN_DURATION_MS: u64 = 60_000;
pub(crate) const LEGENDARY_DRAIN_TIMEOUT_MS: u64 = 5_000;

#[cfg(test)]
pub(crate) const FLOAT_EPSILON: f64 = 1e-9;
