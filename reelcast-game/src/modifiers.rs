//! Buff/debuff pipeline applied to freshly generated catches.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catch::{Catch, Modifier, ModifierKind};
use crate::numbers::round_weight;

/// Player-facing note describing something the engine did during an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum EffectNote {
    ModifierApplied {
        source: String,
        kind: ModifierKind,
        magnitude: f64,
        weight_before: f64,
        weight_after: f64,
        remaining_uses: u32,
    },
    ModifierExpired {
        source: String,
        kind: ModifierKind,
    },
    ModifierGained {
        modifier: Modifier,
        buff: bool,
    },
    DoubleCatch {
        source: String,
    },
    BaitChanged {
        source: String,
        delta: i64,
        pool: u32,
    },
    InventoryCleared {
        source: String,
        items: usize,
        weight: f64,
    },
    Evicted {
        catch: Catch,
    },
}

impl fmt::Display for EffectNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModifierApplied {
                source,
                weight_before,
                weight_after,
                remaining_uses,
                ..
            } => write!(
                f,
                "{source}: {weight_before:.2} kg → {weight_after:.2} kg ({remaining_uses} uses left)"
            ),
            Self::ModifierExpired { source, .. } => write!(f, "{source} wore off"),
            Self::ModifierGained { modifier, buff } => {
                let verb = if *buff { "Buff" } else { "Debuff" };
                write!(f, "{verb} gained: {modifier}")
            }
            Self::DoubleCatch { source } => write!(f, "{source}: two fish on one cast!"),
            Self::BaitChanged {
                source,
                delta,
                pool,
            } => write!(f, "{source}: {delta:+} bait (now {pool})"),
            Self::InventoryCleared {
                source,
                items,
                weight,
            } => write!(f, "{source}: lost {items} fish ({weight:.2} kg)"),
            Self::Evicted { catch } => write!(f, "Released {catch} to make room"),
        }
    }
}

/// Result of running one catch through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub catch: Catch,
    pub buffs: Vec<Modifier>,
    pub debuffs: Vec<Modifier>,
    pub notes: Vec<EffectNote>,
}

/// Apply all buffs then all debuffs, in list order, to a catch.
///
/// Each applied modifier loses one use and is dropped once spent. Double-catch
/// modifiers are left untouched; the orchestrator consumes those per action.
/// Weights are rounded after every step and never fall below `floor`.
#[must_use]
pub fn apply(catch: &Catch, buffs: &[Modifier], debuffs: &[Modifier], floor: f64) -> PipelineOutput {
    if buffs.is_empty() && debuffs.is_empty() {
        return PipelineOutput {
            catch: catch.clone(),
            buffs: Vec::new(),
            debuffs: Vec::new(),
            notes: Vec::new(),
        };
    }

    let mut weight = catch.weight;
    let mut notes = Vec::new();
    let buffs = run_list(buffs, &mut weight, floor, &mut notes);
    let debuffs = run_list(debuffs, &mut weight, floor, &mut notes);

    PipelineOutput {
        catch: catch.with_weight(weight),
        buffs,
        debuffs,
        notes,
    }
}

fn run_list(
    modifiers: &[Modifier],
    weight: &mut f64,
    floor: f64,
    notes: &mut Vec<EffectNote>,
) -> Vec<Modifier> {
    let mut remaining = Vec::with_capacity(modifiers.len());
    for modifier in modifiers {
        if !modifier.kind.applies_per_catch() {
            remaining.push(modifier.clone());
            continue;
        }

        let before = *weight;
        let raw = match modifier.kind {
            ModifierKind::WeightMultiplier => before * (1.0 + modifier.magnitude),
            ModifierKind::FlatWeightBonus => before + modifier.magnitude,
            ModifierKind::DoubleCatch => before,
        };
        *weight = round_weight(raw).max(floor);

        let mut next = modifier.clone();
        let alive = next.consume();
        notes.push(EffectNote::ModifierApplied {
            source: next.source.clone(),
            kind: next.kind,
            magnitude: next.magnitude,
            weight_before: before,
            weight_after: *weight,
            remaining_uses: next.remaining_uses,
        });
        if alive {
            remaining.push(next);
        } else {
            notes.push(EffectNote::ModifierExpired {
                source: next.source,
                kind: next.kind,
            });
        }
    }
    remaining
}
