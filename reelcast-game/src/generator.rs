//! Reward generation: base catches, the weight curve and loot-event rolls.
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::{LootCatalog, LootEffect, LootEntry, MagnitudeRange, RareSpecies, WeightCurve};
use crate::catch::{Catch, CatchSet, Modifier, Timestamp};
use crate::numbers::round_weight;

/// Outcome of the once-per-action loot roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LootEvent {
    /// Junk on the hook; the action's catches are voided.
    Trash,
    Upgrade(LootOutcome),
    Downgrade(LootOutcome),
}

impl LootEvent {
    #[must_use]
    pub const fn is_trash(&self) -> bool {
        matches!(self, Self::Trash)
    }

    #[must_use]
    pub const fn outcome(&self) -> Option<&LootOutcome> {
        match self {
            Self::Trash => None,
            Self::Upgrade(outcome) | Self::Downgrade(outcome) => Some(outcome),
        }
    }
}

/// A fired upgrade or downgrade entry with its secondary rolls resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootOutcome {
    pub id: String,
    pub label: String,
    pub effect: ResolvedEffect,
}

/// Concrete effect to apply to the acting player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolvedEffect {
    /// Pushed onto the buff list (upgrade) or debuff list (downgrade).
    Modifier(Modifier),
    /// Signed change to the bait pool.
    BaitDelta { amount: i64 },
    ClearInventory,
}

/// Draw a weight from the catalog curve.
///
/// With probability `normal_chance` the weight is uniform in `[min, threshold)`.
/// Otherwise the weight is `threshold + r^exponent * (max - threshold)`, so the
/// upper band clusters near `threshold` and weights near `max` are rare.
/// Equivalently, `1 - r^exponent` is the share of the band measured down from `max`.
pub fn roll_weight<R>(curve: &WeightCurve, rng: &mut R) -> f64
where
    R: Rng + ?Sized,
{
    if rng.r#gen::<f64>() < curve.normal_chance {
        let weight = rng.gen_range(curve.min..curve.threshold);
        // Rounding may land exactly on the threshold; keep the lower band half-open.
        let rounded = round_weight(weight);
        if rounded >= curve.threshold {
            round_weight(curve.threshold - 0.01).max(curve.min)
        } else {
            rounded.max(curve.min)
        }
    } else {
        let r = rng.r#gen::<f64>();
        let weight = curve.threshold + r.powi(curve.exponent) * (curve.max - curve.threshold);
        round_weight(weight.clamp(curve.threshold, curve.max))
    }
}

/// Roll every rare species in declaration order, stopping at the first hit.
pub fn roll_rare_species<'a, R>(catalog: &'a LootCatalog, rng: &mut R) -> Option<&'a RareSpecies>
where
    R: Rng + ?Sized,
{
    catalog
        .rare_species
        .iter()
        .find(|rare| rng.r#gen::<f64>() < rare.chance)
}

/// Build the catch for a rare species: uniform base weight plus its bonus.
pub fn rare_catch<R>(rare: &RareSpecies, curve: &WeightCurve, rng: &mut R, now: Timestamp) -> Catch
where
    R: Rng + ?Sized,
{
    let base = rng.gen_range(curve.min..=curve.max);
    Catch::rare(rare.name.clone(), round_weight(base + rare.bonus), rare.bonus, now)
}

/// Generate one base catch.
///
/// `allow_rare` is false for the follow-up catches of a multi-catch action so
/// rare species only drop on primary catches.
pub fn generate_base_catch<R>(
    catalog: &LootCatalog,
    rng: &mut R,
    now: Timestamp,
    allow_rare: bool,
) -> Catch
where
    R: Rng + ?Sized,
{
    if allow_rare && let Some(rare) = roll_rare_species(catalog, rng) {
        return rare_catch(rare, &catalog.weights, rng, now);
    }

    let pool = catalog.species_pool();
    let species = pool[rng.gen_range(0..pool.len())];
    let weight = roll_weight(&catalog.weights, rng);
    Catch::new(species, weight, now)
}

/// Generate the catches for one action. Only the first may be rare.
pub fn generate_catches<R>(
    catalog: &LootCatalog,
    rng: &mut R,
    now: Timestamp,
    count: usize,
) -> CatchSet
where
    R: Rng + ?Sized,
{
    (0..count.max(1))
        .map(|index| generate_base_catch(catalog, &mut *rng, now, index == 0))
        .collect()
}

/// Roll the action's loot event: junk first, then the upgrade table, then the
/// downgrade table, each entry independently in declaration order. The first
/// hit across the three passes wins.
pub fn roll_loot_event<R, M>(
    catalog: &LootCatalog,
    rng: &mut R,
    magnitude_rng: &mut M,
) -> Option<LootEvent>
where
    R: Rng + ?Sized,
    M: Rng + ?Sized,
{
    if rng.r#gen::<f64>() < catalog.junk_chance {
        return Some(LootEvent::Trash);
    }
    if let Some(entry) = first_hit(&catalog.upgrades, rng) {
        return Some(LootEvent::Upgrade(resolve_entry(entry, magnitude_rng)));
    }
    first_hit(&catalog.downgrades, rng)
        .map(|entry| LootEvent::Downgrade(resolve_entry(entry, magnitude_rng)))
}

fn first_hit<'a, R>(entries: &'a [LootEntry], rng: &mut R) -> Option<&'a LootEntry>
where
    R: Rng + ?Sized,
{
    entries.iter().find(|entry| rng.r#gen::<f64>() < entry.chance)
}

fn resolve_entry<M>(entry: &LootEntry, rng: &mut M) -> LootOutcome
where
    M: Rng + ?Sized,
{
    let effect = match &entry.effect {
        LootEffect::Modifier {
            kind,
            magnitude,
            uses,
        } => {
            let value = roll_magnitude(*magnitude, rng);
            ResolvedEffect::Modifier(
                Modifier::new(*kind, value, *uses).with_source(entry.label.clone()),
            )
        }
        LootEffect::BaitGrant { min, max } => ResolvedEffect::BaitDelta {
            amount: i64::from(roll_amount(*min, *max, rng)),
        },
        LootEffect::BaitLoss { min, max } => ResolvedEffect::BaitDelta {
            amount: -i64::from(roll_amount(*min, *max, rng)),
        },
        LootEffect::ClearInventory => ResolvedEffect::ClearInventory,
    };
    LootOutcome {
        id: entry.id.clone(),
        label: entry.label.clone(),
        effect,
    }
}

fn roll_magnitude<M>(range: MagnitudeRange, rng: &mut M) -> f64
where
    M: Rng + ?Sized,
{
    if range.is_fixed() || range.min > range.max {
        return range.min;
    }
    round_weight(rng.gen_range(range.min..=range.max))
}

fn roll_amount<M>(min: u32, max: u32, rng: &mut M) -> u32
where
    M: Rng + ?Sized,
{
    if min >= max {
        return min;
    }
    rng.gen_range(min..=max)
}
