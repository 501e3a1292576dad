use reelcast_game::{
    ActionResult, CastOptions, CommunityId, EffectNote, FishingEngine, LootEvent, PlayerId, RejectReason,
    StateStorage, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape of a seeded lake simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationConfig {
    pub players: usize,
    pub communities: usize,
    pub rounds: usize,
    /// Simulated time between rounds.
    pub step_ms: i64,
    pub start_ms: Timestamp,
}

impl SimulationConfig {
    #[must_use]
    pub const fn new(players: usize, rounds: usize) -> Self {
        Self {
            players,
            communities: 2,
            rounds,
            step_ms: 5 * 60 * 1_000,
            start_ms: 0,
        }
    }

    #[must_use]
    pub const fn with_step(mut self, step_ms: i64) -> Self {
        self.step_ms = step_ms;
        self
    }

    #[must_use]
    pub const fn with_communities(mut self, communities: usize) -> Self {
        self.communities = communities;
        self
    }

    #[must_use]
    pub fn player_ids(&self) -> Vec<PlayerId> {
        (0..self.players).map(|i| PlayerId::new(format!("angler-{i:03}"))).collect()
    }

    #[must_use]
    pub fn community_ids(&self) -> Vec<CommunityId> {
        (0..self.communities.max(1))
            .map(|i| CommunityId::new(format!("lake-{i}")))
            .collect()
    }
}

/// Counters gathered while driving an engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub attempts: u64,
    pub accepted: u64,
    pub rejected_cooldown: u64,
    pub rejected_bait: u64,
    pub catches: u64,
    pub double_catches: u64,
    pub rare_catches: u64,
    pub trash: u64,
    pub evictions: u64,
    /// Fired upgrade and downgrade entries keyed by label.
    pub loot: BTreeMap<String, u64>,
    /// Final weights of non-rare catches.
    #[serde(skip)]
    pub weights: Vec<f64>,
    /// Catalog boundary between the common and upper weight bands.
    pub weight_threshold: f64,
    pub invariant_failures: Vec<String>,
    pub digest: u64,
}

impl SimulationReport {
    /// Record one action outcome.
    pub fn observe(&mut self, result: &ActionResult) {
        self.attempts += 1;
        match result {
            ActionResult::Rejected(RejectReason::Cooldown { .. }) => self.rejected_cooldown += 1,
            ActionResult::Rejected(RejectReason::NoResource { .. }) => self.rejected_bait += 1,
            ActionResult::Voided { .. } => {
                self.accepted += 1;
                self.trash += 1;
            }
            ActionResult::Caught(report) => {
                self.accepted += 1;
                if report.catches.len() > 1 {
                    self.double_catches += 1;
                }
                for catch in &report.catches {
                    self.catches += 1;
                    if catch.is_rare {
                        self.rare_catches += 1;
                    } else {
                        self.weights.push(catch.weight);
                    }
                }
                let evicted = report
                    .notes
                    .iter()
                    .filter(|n| matches!(n, EffectNote::Evicted { .. }))
                    .count();
                self.evictions += u64::try_from(evicted).unwrap_or(u64::MAX);
                if let Some(LootEvent::Upgrade(outcome) | LootEvent::Downgrade(outcome)) =
                    &report.loot_event
                {
                    *self.loot.entry(outcome.label.clone()).or_default() += 1;
                }
            }
        }
    }

    /// Share of non-rare weights strictly below `threshold`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn share_below(&self, threshold: f64) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        let below = self.weights.iter().filter(|w| **w < threshold).count();
        below as f64 / self.weights.len() as f64
    }

    /// Median of non-rare weights at or above `threshold`.
    #[must_use]
    pub fn upper_median(&self, threshold: f64) -> Option<f64> {
        let mut upper: Vec<f64> = self.weights.iter().copied().filter(|w| *w >= threshold).collect();
        if upper.is_empty() {
            return None;
        }
        upper.sort_by(f64::total_cmp);
        Some(upper[upper.len() / 2])
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn trash_rate(&self) -> f64 {
        if self.accepted == 0 {
            0.0
        } else {
            self.trash as f64 / self.accepted as f64
        }
    }
}

/// Drive `engine` through `config.rounds` rounds where every player casts once
/// per round, auditing invariants after each action.
///
/// # Errors
///
/// Returns an error if the engine refuses an action outright.
pub fn run_simulation<S: StateStorage>(
    engine: &mut FishingEngine<S>,
    config: &SimulationConfig,
) -> anyhow::Result<SimulationReport> {
    let players = config.player_ids();
    let communities = config.community_ids();
    let mut report = SimulationReport {
        weight_threshold: engine.catalog().weights.threshold,
        ..SimulationReport::default()
    };
    let mut now = config.start_ms;

    for round in 0..config.rounds {
        for (index, player) in players.iter().enumerate() {
            let community = &communities[index % communities.len()];
            let result = engine.attempt_catch(
                player,
                community,
                player.as_str(),
                CastOptions::default(),
                now,
            )?;
            report.observe(&result);
            if let Err(err) = engine.audit() {
                report
                    .invariant_failures
                    .push(format!("round {round}, {player}: {err}"));
            }
        }
        now += config.step_ms;
    }

    report.digest = engine.state_digest();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcast_game::{EngineConfig, MemoryStorage, default_catalog};

    fn engine(seed: u64) -> FishingEngine<MemoryStorage> {
        FishingEngine::init(
            MemoryStorage::new(),
            EngineConfig::default(),
            default_catalog().clone(),
            seed,
            0,
        )
        .unwrap()
    }

    #[test]
    fn simulation_counts_every_attempt() {
        let config = SimulationConfig::new(4, 25);
        let report = run_simulation(&mut engine(7), &config).unwrap();
        assert_eq!(report.attempts, 100);
        assert_eq!(
            report.accepted + report.rejected_bait + report.rejected_cooldown,
            report.attempts
        );
        assert!(report.invariant_failures.is_empty());
        assert!(report.catches >= report.accepted - report.trash);
    }

    #[test]
    fn same_seed_reproduces_the_digest() {
        let config = SimulationConfig::new(3, 40).with_step(45_000);
        let first = run_simulation(&mut engine(99), &config).unwrap();
        let second = run_simulation(&mut engine(99), &config).unwrap();
        assert_eq!(first.digest, second.digest);
        assert_eq!(first.loot, second.loot);
    }

    #[test]
    fn fast_rounds_hit_the_cooldown() {
        let config = SimulationConfig::new(1, 10).with_step(1_000);
        let report = run_simulation(&mut engine(1), &config).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected_cooldown, 9);
    }

    #[test]
    fn share_helpers_handle_empty_reports() {
        let report = SimulationReport::default();
        assert!(report.share_below(10.0).abs() < f64::EPSILON);
        assert!(report.upper_median(10.0).is_none());
        assert!(report.trash_rate().abs() < f64::EPSILON);
    }
}
