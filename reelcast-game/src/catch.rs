//! Catch and modifier value types shared across the engine.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Catches produced by one action; a double catch stays inline.
pub type CatchSet = SmallVec<[Catch; 2]>;

/// One generated reward item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catch {
    pub species: String,
    /// Weight in kilograms, rounded to two decimals.
    pub weight: f64,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub is_rare: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rarity_bonus: Option<f64>,
}

impl Catch {
    /// A regular catch from the common species table.
    #[must_use]
    pub fn new(species: impl Into<String>, weight: f64, timestamp: Timestamp) -> Self {
        Self {
            species: species.into(),
            weight,
            timestamp,
            is_rare: false,
            rarity_bonus: None,
        }
    }

    /// A rare-species catch carrying its fixed weight bonus.
    #[must_use]
    pub fn rare(species: impl Into<String>, weight: f64, bonus: f64, timestamp: Timestamp) -> Self {
        Self {
            species: species.into(),
            weight,
            timestamp,
            is_rare: true,
            rarity_bonus: Some(bonus),
        }
    }

    /// Copy of this catch with a different weight.
    #[must_use]
    pub fn with_weight(&self, weight: f64) -> Self {
        Self {
            weight,
            ..self.clone()
        }
    }
}

impl fmt::Display for Catch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_rare {
            write!(f, "★ {} ({:.2} kg)", self.species, self.weight)
        } else {
            write!(f, "{} ({:.2} kg)", self.species, self.weight)
        }
    }
}

/// Effect family of a buff or debuff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    /// `weight *= 1 + magnitude`
    WeightMultiplier,
    /// `weight += magnitude`
    FlatWeightBonus,
    /// Next action yields two catches; consumed per action, not per catch.
    DoubleCatch,
}

impl ModifierKind {
    /// Whether the catch pipeline applies this kind to individual catches.
    #[must_use]
    pub const fn applies_per_catch(self) -> bool {
        !matches!(self, Self::DoubleCatch)
    }
}

/// A stacking, use-limited effect on future catches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub kind: ModifierKind,
    pub magnitude: f64,
    pub remaining_uses: u32,
    /// Loot-table label that granted the modifier.
    #[serde(default)]
    pub source: String,
}

impl Modifier {
    #[must_use]
    pub fn new(kind: ModifierKind, magnitude: f64, remaining_uses: u32) -> Self {
        Self {
            kind,
            magnitude,
            remaining_uses,
            source: String::new(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Spent modifiers are dropped from the active lists.
    #[must_use]
    pub const fn is_spent(&self) -> bool {
        self.remaining_uses == 0
    }

    /// Consume one use, returning whether uses remain.
    pub const fn consume(&mut self) -> bool {
        self.remaining_uses = self.remaining_uses.saturating_sub(1);
        self.remaining_uses > 0
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.source.is_empty() {
            "modifier"
        } else {
            self.source.as_str()
        };
        match self.kind {
            ModifierKind::WeightMultiplier => write!(
                f,
                "{label} {:+.0}% weight ({} left)",
                self.magnitude * 100.0,
                self.remaining_uses
            ),
            ModifierKind::FlatWeightBonus => write!(
                f,
                "{label} {:+.2} kg ({} left)",
                self.magnitude, self.remaining_uses
            ),
            ModifierKind::DoubleCatch => {
                write!(f, "{label} double catch ({} left)", self.remaining_uses)
            }
        }
    }
}
