//! Loot catalog: species tables, the weight curve and the loot-event tables.
//!
//! The shipped catalog lives in `data/loot_catalog.json` and is parsed once per
//! process. Deployments may load their own catalog with [`LootCatalog::from_json`];
//! [`LootCatalog::validate`] rejects tables that would make the rollers misbehave.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

use crate::catch::ModifierKind;
use crate::constants::{
    FALLBACK_SPECIES, JUNK_CHANCE, MAX_WEIGHT, MIN_WEIGHT, NORMAL_RANGE_CHANCE,
    UPPER_RANGE_EXPONENT, WEIGHT_THRESHOLD,
};

const DEFAULT_CATALOG_DATA: &str = include_str!("../data/loot_catalog.json");

/// Shape of the weight distribution for normal catches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightCurve {
    #[serde(default = "WeightCurve::default_min")]
    pub min: f64,
    #[serde(default = "WeightCurve::default_threshold")]
    pub threshold: f64,
    #[serde(default = "WeightCurve::default_max")]
    pub max: f64,
    /// Probability of drawing from `[min, threshold)`.
    #[serde(default = "WeightCurve::default_normal_chance")]
    pub normal_chance: f64,
    /// Skew exponent for the upper range.
    #[serde(default = "WeightCurve::default_exponent")]
    pub exponent: i32,
}

impl WeightCurve {
    const fn default_min() -> f64 {
        MIN_WEIGHT
    }

    const fn default_threshold() -> f64 {
        WEIGHT_THRESHOLD
    }

    const fn default_max() -> f64 {
        MAX_WEIGHT
    }

    const fn default_normal_chance() -> f64 {
        NORMAL_RANGE_CHANCE
    }

    const fn default_exponent() -> i32 {
        UPPER_RANGE_EXPONENT
    }
}

impl Default for WeightCurve {
    fn default() -> Self {
        Self {
            min: Self::default_min(),
            threshold: Self::default_threshold(),
            max: Self::default_max(),
            normal_chance: Self::default_normal_chance(),
            exponent: Self::default_exponent(),
        }
    }
}

/// A rare species with its own independent drop chance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RareSpecies {
    pub name: String,
    pub chance: f64,
    /// Fixed weight added on top of a uniform base draw.
    pub bonus: f64,
}

/// Inclusive range for a randomized modifier magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MagnitudeRange {
    pub min: f64,
    pub max: f64,
}

impl MagnitudeRange {
    #[must_use]
    pub const fn fixed(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    #[must_use]
    pub fn is_fixed(&self) -> bool {
        (self.max - self.min).abs() < f64::EPSILON
    }
}

const fn default_uses() -> u32 {
    1
}

/// What a loot entry does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LootEffect {
    /// Push a buff (upgrade table) or debuff (downgrade table).
    Modifier {
        kind: ModifierKind,
        #[serde(default)]
        magnitude: MagnitudeRange,
        #[serde(default = "default_uses")]
        uses: u32,
    },
    /// Add bait, clamped to the pool cap.
    BaitGrant { min: u32, max: u32 },
    /// Remove bait, floored at zero.
    BaitLoss { min: u32, max: u32 },
    /// Empty the player's inventory.
    ClearInventory,
}

/// One row of the upgrade or downgrade table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootEntry {
    pub id: String,
    pub label: String,
    pub chance: f64,
    pub effect: LootEffect,
}

/// Complete static reward configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootCatalog {
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub weights: WeightCurve,
    /// Evaluated in declaration order; the first hit wins.
    #[serde(default)]
    pub rare_species: Vec<RareSpecies>,
    #[serde(default = "LootCatalog::default_junk_chance")]
    pub junk_chance: f64,
    #[serde(default)]
    pub upgrades: Vec<LootEntry>,
    #[serde(default)]
    pub downgrades: Vec<LootEntry>,
}

impl Default for LootCatalog {
    fn default() -> Self {
        Self {
            species: Vec::new(),
            weights: WeightCurve::default(),
            rare_species: Vec::new(),
            junk_chance: Self::default_junk_chance(),
            upgrades: Vec::new(),
            downgrades: Vec::new(),
        }
    }
}

/// Which table a validation failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LootTable {
    Rare,
    Junk,
    Upgrade,
    Downgrade,
}

impl std::fmt::Display for LootTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rare => "rare_species",
            Self::Junk => "junk",
            Self::Upgrade => "upgrades",
            Self::Downgrade => "downgrades",
        };
        f.write_str(name)
    }
}

/// Errors raised when loot catalog invariants are violated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("{table} entry `{id}` has chance {value:.4} outside [0, 1]")]
    Probability {
        table: LootTable,
        id: String,
        value: f64,
    },
    #[error("weight curve must satisfy 0 < min < threshold < max (got {min}, {threshold}, {max})")]
    WeightBounds { min: f64, threshold: f64, max: f64 },
    #[error("weight curve normal chance {value:.2} outside [0, 1]")]
    NormalChance { value: f64 },
    #[error("weight curve exponent must be at least 1 (got {value})")]
    Exponent { value: i32 },
    #[error("entry `{id}` has magnitude range min {min} > max {max}")]
    MagnitudeBounds { id: String, min: f64, max: f64 },
    #[error("entry `{id}` weight multiplier {value} would make weights non-positive")]
    MultiplierFloor { id: String, value: f64 },
    #[error("entry `{id}` grants a modifier with zero uses")]
    ZeroUses { id: String },
    #[error("entry `{id}` has bait range min {min} > max {max}")]
    BaitBounds { id: String, min: u32, max: u32 },
    #[error("downgrade entry `{id}` cannot grant a double catch")]
    DoubleCatchDowngrade { id: String },
    #[error("loot entry id `{id}` is declared more than once")]
    DuplicateId { id: String },
}

impl LootCatalog {
    const fn default_junk_chance() -> f64 {
        JUNK_CHANCE
    }

    /// Parse the shipped catalog, falling back to empty tables on malformed data.
    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_CATALOG_DATA).unwrap_or_default()
    }

    /// Load a catalog from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Species used for normal catches, substituting the fallback pair when
    /// the configured list is empty.
    #[must_use]
    pub fn species_pool(&self) -> Vec<&str> {
        if self.species.is_empty() {
            FALLBACK_SPECIES.to_vec()
        } else {
            self.species.iter().map(String::as_str).collect()
        }
    }

    /// Validate every table.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let curve = &self.weights;
        if !(curve.min > 0.0 && curve.min < curve.threshold && curve.threshold < curve.max) {
            return Err(CatalogError::WeightBounds {
                min: curve.min,
                threshold: curve.threshold,
                max: curve.max,
            });
        }
        if !(0.0..=1.0).contains(&curve.normal_chance) {
            return Err(CatalogError::NormalChance {
                value: curve.normal_chance,
            });
        }
        if curve.exponent < 1 {
            return Err(CatalogError::Exponent {
                value: curve.exponent,
            });
        }

        for rare in &self.rare_species {
            check_probability(LootTable::Rare, &rare.name, rare.chance)?;
        }
        check_probability(LootTable::Junk, "junk", self.junk_chance)?;

        let mut seen = HashSet::new();
        for (table, entries) in [
            (LootTable::Upgrade, &self.upgrades),
            (LootTable::Downgrade, &self.downgrades),
        ] {
            for entry in entries {
                if !seen.insert(entry.id.as_str()) {
                    return Err(CatalogError::DuplicateId {
                        id: entry.id.clone(),
                    });
                }
                check_probability(table, &entry.id, entry.chance)?;
                validate_effect(table, entry)?;
            }
        }
        Ok(())
    }
}

fn check_probability(table: LootTable, id: &str, value: f64) -> Result<(), CatalogError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CatalogError::Probability {
            table,
            id: id.to_string(),
            value,
        })
    }
}

fn validate_effect(table: LootTable, entry: &LootEntry) -> Result<(), CatalogError> {
    match &entry.effect {
        LootEffect::Modifier {
            kind,
            magnitude,
            uses,
        } => {
            if *uses == 0 {
                return Err(CatalogError::ZeroUses {
                    id: entry.id.clone(),
                });
            }
            if magnitude.min > magnitude.max {
                return Err(CatalogError::MagnitudeBounds {
                    id: entry.id.clone(),
                    min: magnitude.min,
                    max: magnitude.max,
                });
            }
            if *kind == ModifierKind::WeightMultiplier && magnitude.min <= -1.0 {
                return Err(CatalogError::MultiplierFloor {
                    id: entry.id.clone(),
                    value: magnitude.min,
                });
            }
            if *kind == ModifierKind::DoubleCatch && table == LootTable::Downgrade {
                return Err(CatalogError::DoubleCatchDowngrade {
                    id: entry.id.clone(),
                });
            }
            Ok(())
        }
        LootEffect::BaitGrant { min, max } | LootEffect::BaitLoss { min, max } => {
            if min > max {
                Err(CatalogError::BaitBounds {
                    id: entry.id.clone(),
                    min: *min,
                    max: *max,
                })
            } else {
                Ok(())
            }
        }
        LootEffect::ClearInventory => Ok(()),
    }
}

/// Process-wide shipped catalog.
#[must_use]
pub fn default_catalog() -> &'static LootCatalog {
    static CATALOG: OnceLock<LootCatalog> = OnceLock::new();
    CATALOG.get_or_init(LootCatalog::load_from_static)
}
