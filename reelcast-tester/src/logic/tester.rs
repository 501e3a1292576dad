use anyhow::{Context, Result, bail};
use colored::Colorize;
use reelcast_game::{
    EngineConfig, FishingEngine, JsonFileStorage, LootCatalog, LootEvent, MemoryStorage, RngBundle,
    generate_base_catch, roll_loot_event,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::logic::simulation::{SimulationConfig, run_simulation};

/// Draws per iteration for the distribution scenario.
const DISTRIBUTION_SAMPLES: usize = 20_000;
const DISTRIBUTION_TOLERANCE: f64 = 0.02;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: u64,
    pub passed: bool,
    pub iterations_run: usize,
    pub successful_iterations: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub average_duration: Duration,
}

/// A named check run once per iteration seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Catch weights, rare drops and junk follow the catalog odds.
    Distribution,
    /// Busy multi-player lake never breaks player invariants.
    Invariants,
    /// Same seed, same state digest.
    Determinism,
    /// Flushed state reloads to the same digest.
    Persistence,
}

impl Scenario {
    pub const ALL: [Self; 4] = [
        Self::Distribution,
        Self::Invariants,
        Self::Determinism,
        Self::Persistence,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Distribution => "distribution",
            Self::Invariants => "invariants",
            Self::Determinism => "determinism",
            Self::Persistence => "persistence",
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Distribution => "Weight curve, rare drops and junk rate track the catalog",
            Self::Invariants => "Pool cap, inventory capacity and weight sums hold every action",
            Self::Determinism => "Two runs from one seed end with identical state digests",
            Self::Persistence => "Atomic flush then reload reproduces the state digest",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key().eq_ignore_ascii_case(key))
    }
}

/// `(key, description)` pairs for `--list-scenarios`.
#[must_use]
pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    Scenario::ALL.iter().map(|s| (s.key(), s.description())).collect()
}

/// Engine inputs shared by every scenario run.
#[derive(Debug, Clone)]
pub struct TesterAssets {
    pub config: EngineConfig,
    pub catalog: LootCatalog,
    pub simulation: SimulationConfig,
}

pub struct LogicTester {
    assets: TesterAssets,
    verbose: bool,
}

impl LogicTester {
    pub const fn new(assets: TesterAssets, verbose: bool) -> Self {
        Self { assets, verbose }
    }

    pub fn run_scenario(&self, scenario: Scenario, seeds: &[u64], iterations: usize) -> Vec<ScenarioResult> {
        seeds
            .iter()
            .map(|&seed| {
                if self.verbose {
                    println!(
                        "🧪 Testing scenario: {} (seed: {seed})",
                        scenario.key().bright_white()
                    );
                }
                self.run_single_scenario(scenario, seed, iterations)
            })
            .collect()
    }

    fn run_single_scenario(&self, scenario: Scenario, seed: u64, iterations: usize) -> ScenarioResult {
        let mut successes = 0;
        let mut failures = Vec::new();
        let mut durations = Vec::new();

        for i in 0..iterations {
            let iteration_seed = seed.wrapping_add(u64::try_from(i).unwrap_or(u64::MAX));
            let start_time = Instant::now();
            match self.check(scenario, iteration_seed) {
                Ok(()) => {
                    successes += 1;
                    let duration = start_time.elapsed();
                    durations.push(duration);
                    if self.verbose {
                        println!("  ✅ Iteration {}/{} passed ({duration:?})", i + 1, iterations);
                    }
                }
                Err(err) => {
                    let message = format!("Iteration {} (seed {iteration_seed}): {err:#}", i + 1);
                    if self.verbose {
                        println!("  ❌ {}", message.clone().red());
                    }
                    failures.push(message);
                }
            }
        }

        let average_duration = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / u32::try_from(durations.len()).unwrap_or(1)
        };

        ScenarioResult {
            scenario_name: scenario.key().to_string(),
            seed,
            passed: failures.is_empty(),
            iterations_run: iterations,
            successful_iterations: successes,
            failures,
            average_duration,
        }
    }

    fn engine(&self, seed: u64) -> Result<FishingEngine<MemoryStorage>> {
        FishingEngine::init(
            MemoryStorage::new(),
            self.assets.config.clone(),
            self.assets.catalog.clone(),
            seed,
            self.assets.simulation.start_ms,
        )
        .context("engine init")
    }

    fn check(&self, scenario: Scenario, seed: u64) -> Result<()> {
        match scenario {
            Scenario::Distribution => check_distribution(&self.assets.catalog, seed),
            Scenario::Invariants => {
                let report = run_simulation(&mut self.engine(seed)?, &self.assets.simulation)?;
                if let Some(first) = report.invariant_failures.first() {
                    bail!(
                        "{} invariant failures, first: {first}",
                        report.invariant_failures.len()
                    );
                }
                if report.accepted == 0 {
                    bail!("no action was accepted in {} attempts", report.attempts);
                }
                Ok(())
            }
            Scenario::Determinism => {
                let mut left = self.engine(seed)?;
                let mut right = self.engine(seed)?;
                let first = run_simulation(&mut left, &self.assets.simulation)?;
                let second = run_simulation(&mut right, &self.assets.simulation)?;
                if first.digest != second.digest {
                    bail!(
                        "digests diverged: {:016x} vs {:016x}",
                        first.digest,
                        second.digest
                    );
                }
                if left.rng_draws() != right.rng_draws() {
                    bail!(
                        "rng draw counts diverged: {:?} vs {:?}",
                        left.rng_draws(),
                        right.rng_draws()
                    );
                }
                Ok(())
            }
            Scenario::Persistence => self.check_persistence(seed),
        }
    }

    fn check_persistence(&self, seed: u64) -> Result<()> {
        let dir = std::env::temp_dir().join(format!("reelcast-tester-{}-{seed}", std::process::id()));
        let path = dir.join("state.json");
        let _ = std::fs::remove_dir_all(&dir);
        let mut engine = FishingEngine::init(
            JsonFileStorage::new(&path),
            self.assets.config.clone(),
            self.assets.catalog.clone(),
            seed,
            self.assets.simulation.start_ms,
        )?;
        let report = run_simulation(&mut engine, &self.assets.simulation)?;
        let finished_at = self.assets.simulation.start_ms
            + self.assets.simulation.step_ms * i64::try_from(self.assets.simulation.rounds).unwrap_or(0);
        let written = engine.shutdown(finished_at)?;

        let reloaded = FishingEngine::init(
            JsonFileStorage::new(&path),
            self.assets.config.clone(),
            self.assets.catalog.clone(),
            seed,
            finished_at,
        )?;
        let _ = std::fs::remove_dir_all(&dir);
        if written != report.digest || reloaded.state_digest() != written {
            bail!(
                "digest mismatch: simulated {:016x}, written {written:016x}, reloaded {:016x}",
                report.digest,
                reloaded.state_digest()
            );
        }
        Ok(())
    }
}

fn check_distribution(catalog: &LootCatalog, seed: u64) -> Result<()> {
    let mut bundle = RngBundle::from_user_seed(seed);
    let curve = &catalog.weights;
    let mut lower = 0usize;
    let mut normal = 0usize;
    let mut rare = 0usize;
    let mut trash = 0usize;
    for _ in 0..DISTRIBUTION_SAMPLES {
        let catch = generate_base_catch(catalog, bundle.catch(), 0, true);
        if catch.is_rare {
            rare += 1;
        } else {
            normal += 1;
            if catch.weight < curve.threshold {
                lower += 1;
            }
        }
        let (loot, magnitude) = bundle.loot_streams();
        if matches!(roll_loot_event(catalog, loot, magnitude), Some(LootEvent::Trash)) {
            trash += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let share = |count: usize, total: usize| count as f64 / total.max(1) as f64;
    let lower_share = share(lower, normal);
    if (lower_share - curve.normal_chance).abs() > DISTRIBUTION_TOLERANCE {
        bail!(
            "lower band share {lower_share:.4} drifted from {:.2}",
            curve.normal_chance
        );
    }
    let trash_rate = share(trash, DISTRIBUTION_SAMPLES);
    if (trash_rate - catalog.junk_chance).abs() > DISTRIBUTION_TOLERANCE {
        bail!("junk rate {trash_rate:.4} drifted from {:.2}", catalog.junk_chance);
    }
    let rare_ceiling: f64 = catalog.rare_species.iter().map(|r| r.chance).sum();
    if share(rare, DISTRIBUTION_SAMPLES) > rare_ceiling + DISTRIBUTION_TOLERANCE {
        bail!("rare drops exceed the combined chance {rare_ceiling:.4}");
    }
    Ok(())
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u128::deserialize(deserializer)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }
}
