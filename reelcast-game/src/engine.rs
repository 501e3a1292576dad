//! The fishing engine: one owner of all player state, driven through
//! [`FishingEngine::attempt_catch`] and the query surface.
use anyhow::Context;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::catalog::{LootCatalog, default_catalog};
use crate::catch::{CatchSet, ModifierKind, Timestamp};
use crate::config::{ConfigError, EngineConfig};
use crate::generator::{LootEvent, ResolvedEffect, generate_catches, roll_loot_event};
use crate::legendary::{LegendaryNotice, LegendaryRecord};
use crate::modifiers::{self, EffectNote};
use crate::numbers::clamp_pool;
use crate::persistence::{FlushOutcome, FlushTicket, FullState, JsonFileStorage, PersistenceManager, StateStorage};
use crate::rng::RngBundle;
use crate::scheduler::{self, RejectReason};
use crate::state::{
    CommunityId, GlobalStats, InvariantViolation, LeaderboardEntry, LeaderboardKey, Ledger, PlayerId,
    PlayerState, PlayerSummary,
};

/// Caller-supplied flavour for a cast. Never affects odds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration: Option<String>,
}

impl CastOptions {
    #[must_use]
    pub fn decorated(decoration: impl Into<String>) -> Self {
        Self {
            decoration: Some(decoration.into()),
        }
    }
}

/// A successful action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchReport {
    pub catches: CatchSet,
    pub loot_event: Option<LootEvent>,
    pub notes: Vec<EffectNote>,
    /// Bait left after the action.
    pub bait: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoration: Option<String>,
    /// Rare catches awaiting artifact and broadcast side effects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legendary: Vec<LegendaryNotice>,
}

/// Outcome of [`FishingEngine::attempt_catch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionResult {
    /// Turned away at the gate; no state changed.
    Rejected(RejectReason),
    Caught(CatchReport),
    /// Junk on the hook: the action's catches were discarded.
    Voided { event: LootEvent, bait: u32 },
}

impl ActionResult {
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    #[must_use]
    pub const fn report(&self) -> Option<&CatchReport> {
        match self {
            Self::Caught(report) => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load state: {0}")]
    Load(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to persist state: {0}")]
    Persist(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("invariant violated for player {player}: {violation}")]
    Invariant {
        player: PlayerId,
        violation: InvariantViolation,
    },
}

/// Reward-economy engine over a storage collaborator.
#[derive(Debug)]
pub struct FishingEngine<S: StateStorage> {
    config: EngineConfig,
    catalog: LootCatalog,
    rng: RngBundle,
    ledger: Ledger,
    persistence: PersistenceManager<S>,
}

impl FishingEngine<JsonFileStorage> {
    /// Open an engine backed by a JSON state file, with optional JSON
    /// overrides for the engine config and the loot catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if an override file cannot be read or parsed, or if
    /// the engine fails to initialise.
    pub fn open(
        state_path: &Path,
        config_path: Option<&Path>,
        catalog_path: Option<&Path>,
        seed: u64,
        now: Timestamp,
    ) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading engine config {}", path.display()))?;
                EngineConfig::from_json(&json)
                    .with_context(|| format!("parsing engine config {}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        let catalog = match catalog_path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading loot catalog {}", path.display()))?;
                LootCatalog::from_json(&json)
                    .with_context(|| format!("parsing loot catalog {}", path.display()))?
            }
            None => default_catalog().clone(),
        };
        Self::init(JsonFileStorage::new(state_path), config, catalog, seed, now)
            .with_context(|| format!("opening engine state {}", state_path.display()))
    }
}

impl<S: StateStorage> FishingEngine<S> {
    /// Validate configuration and load the persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or catalog is invalid or storage cannot be read.
    pub fn init(
        storage: S,
        config: EngineConfig,
        catalog: LootCatalog,
        seed: u64,
        now: Timestamp,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        catalog.validate().map_err(ConfigError::from)?;
        let state = storage
            .load_all()
            .map_err(|err| EngineError::Load(Box::new(err)))?;
        let ledger = Ledger::from_state(state);
        if let Err((player, violation)) = ledger.audit(config.max_bait, config.inventory_capacity) {
            warn!("loaded state has inconsistent player {player}: {violation}");
        }
        info!(
            "engine ready: {} players, {} communities, {} legendary records",
            ledger.state().players.len(),
            ledger.state().communities.len(),
            ledger.legendary_records().len()
        );
        let persistence = PersistenceManager::new(storage, config.flush_interval_ms, now);
        Ok(Self {
            config,
            catalog,
            rng: RngBundle::from_user_seed(seed),
            ledger,
            persistence,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn catalog(&self) -> &LootCatalog {
        &self.catalog
    }

    /// Draw counts per RNG stream as `(catch, loot, magnitude)`.
    #[must_use]
    pub const fn rng_draws(&self) -> (u64, u64, u64) {
        self.rng.draws()
    }

    /// Toggle the inline `maybe_flush` after each mutation.
    pub const fn set_flush_on_action(&mut self, enabled: bool) {
        self.config.flush_on_action = enabled;
    }

    /// Run one action for a player.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invariant`] when the action would break player
    /// invariants; the action is rolled back and no state changes.
    pub fn attempt_catch(
        &mut self,
        player: &PlayerId,
        community: &CommunityId,
        display_name: &str,
        options: CastOptions,
        now: Timestamp,
    ) -> Result<ActionResult, EngineError> {
        let schedule = self.config.schedule();
        let previous = self.ledger.player(player).cloned();
        let mut view = previous
            .clone()
            .unwrap_or_else(|| PlayerState::new(display_name, now, &schedule));
        scheduler::regenerate(&mut view, now, &schedule);
        if let Err(reason) = scheduler::gate(&view, now, &schedule) {
            debug!("cast by {player} rejected: {reason}");
            return Ok(ActionResult::Rejected(reason));
        }

        let working = self.ledger.get_or_create(player, display_name, now, &schedule);
        scheduler::regenerate(working, now, &schedule);
        scheduler::charge_action(working, now, &schedule);

        let double_catch = working
            .active_buffs
            .iter()
            .position(|m| m.kind == ModifierKind::DoubleCatch);
        let count = if double_catch.is_some() { 2 } else { 1 };
        let generated = generate_catches(&self.catalog, self.rng.catch(), now, count);
        let (loot_rng, magnitude_rng) = self.rng.loot_streams();
        let loot_event = roll_loot_event(&self.catalog, loot_rng, magnitude_rng);

        if let Some(event) = loot_event.as_ref().filter(|e| e.is_trash()) {
            working.total_trash_caught = working.total_trash_caught.saturating_add(1);
            let bait = working.resource_pool;
            self.persistence.mark_dirty();
            debug!("cast by {player} voided by junk ({count} catches discarded)");
            self.after_mutation(now);
            return Ok(ActionResult::Voided {
                event: event.clone(),
                bait,
            });
        }

        let mut notes = Vec::new();
        if let Some(index) = double_catch {
            let modifier = &mut working.active_buffs[index];
            notes.push(EffectNote::DoubleCatch {
                source: modifier.source.clone(),
            });
            if !modifier.consume() {
                let spent = working.active_buffs.remove(index);
                notes.push(EffectNote::ModifierExpired {
                    source: spent.source,
                    kind: spent.kind,
                });
            }
        }

        let previous_community = self.ledger.community(community).cloned();

        let floor = self.catalog.weights.min;
        let capacity = self.config.inventory_capacity;
        let mut catches = CatchSet::new();
        let mut legendary = Vec::new();
        for raw in generated {
            let Some(state) = self.ledger.player_mut(player) else {
                return Err(EngineError::UnknownPlayer(player.clone()));
            };
            let output = modifiers::apply(&raw, &state.active_buffs, &state.active_debuffs, floor);
            state.active_buffs = output.buffs;
            state.active_debuffs = output.debuffs;
            notes.extend(output.notes);
            let catch = output.catch;
            if catch.is_rare {
                info!("{player} landed a legendary {}", catch);
                legendary.push(LegendaryNotice {
                    catch: catch.clone(),
                    player_id: player.clone(),
                    display_name: state.display_name.clone(),
                    community_id: community.clone(),
                    decoration: options.decoration.clone(),
                    record_index: 0,
                });
            }
            if let Some(evicted) = self.ledger.record_catch(player, community, catch.clone(), capacity) {
                notes.push(EffectNote::Evicted { catch: evicted });
            }
            catches.push(catch);
        }

        if let Some(event) = &loot_event {
            self.apply_loot_event(player, event, &mut notes);
        }

        let checked = self
            .ledger
            .player(player)
            .map(|state| state.check_invariants(schedule.max_bait, capacity));
        if let Some(Err(violation)) = checked {
            error!("rolling back cast by {player}: {violation}");
            self.ledger.set_player(player, previous);
            self.ledger.set_community(community, previous_community);
            return Err(EngineError::Invariant {
                player: player.clone(),
                violation,
            });
        }

        for notice in &mut legendary {
            notice.record_index = self.ledger.append_legendary(notice.to_record(None));
        }
        let bait = self.ledger.player(player).map_or(0, |state| state.resource_pool);
        self.persistence.mark_dirty();
        self.after_mutation(now);

        Ok(ActionResult::Caught(CatchReport {
            catches,
            loot_event,
            notes,
            bait,
            decoration: options.decoration,
            legendary,
        }))
    }

    fn apply_loot_event(&mut self, player: &PlayerId, event: &LootEvent, notes: &mut Vec<EffectNote>) {
        let Some(outcome) = event.outcome() else {
            return;
        };
        let max_bait = self.config.max_bait;
        let Some(state) = self.ledger.player_mut(player) else {
            return;
        };
        match &outcome.effect {
            ResolvedEffect::Modifier(modifier) => {
                let buff = matches!(event, LootEvent::Upgrade(_));
                state.push_modifier(modifier.clone(), buff);
                notes.push(EffectNote::ModifierGained {
                    modifier: modifier.clone(),
                    buff,
                });
            }
            ResolvedEffect::BaitDelta { amount } => {
                let before = state.resource_pool;
                state.resource_pool = clamp_pool(before, *amount, max_bait);
                notes.push(EffectNote::BaitChanged {
                    source: outcome.label.clone(),
                    delta: i64::from(state.resource_pool) - i64::from(before),
                    pool: state.resource_pool,
                });
            }
            ResolvedEffect::ClearInventory => {
                let (items, weight) = state.clear_inventory();
                notes.push(EffectNote::InventoryCleared {
                    source: outcome.label.clone(),
                    items,
                    weight,
                });
            }
        }
    }

    fn after_mutation(&mut self, now: Timestamp) {
        if self.config.flush_on_action
            && self.persistence.maybe_flush(now, self.ledger.state()) == FlushOutcome::Failed
        {
            debug!("inline flush failed, state stays dirty for the next attempt");
        }
    }

    /// Fill in the artifact of the legendary record at `index`, once.
    pub fn attach_artifact(&mut self, index: usize, reference: String) -> bool {
        let attached = self.ledger.attach_artifact(index, reference);
        if attached {
            self.persistence.mark_dirty();
        }
        attached
    }

    #[must_use]
    pub fn legendary_records(&self) -> &[LegendaryRecord] {
        self.ledger.legendary_records()
    }

    #[must_use]
    pub fn player(&self, player: &PlayerId) -> Option<&PlayerState> {
        self.ledger.player(player)
    }

    /// Player view as of `now`; reading never regenerates stored bait.
    #[must_use]
    pub fn player_summary(&self, player: &PlayerId, now: Timestamp) -> Option<PlayerSummary> {
        self.ledger.summary(player, now, &self.config.schedule())
    }

    #[must_use]
    pub fn community_leaderboard(
        &self,
        community: &CommunityId,
        key: LeaderboardKey,
        limit: usize,
    ) -> Vec<LeaderboardEntry> {
        self.ledger.leaderboard(community, key, limit)
    }

    #[must_use]
    pub fn global_stats(&self) -> GlobalStats {
        self.ledger.global_stats()
    }

    /// Privileged: wipe a community's leaderboard. Player progress is kept.
    pub fn reset_community(&mut self, community: &CommunityId) -> bool {
        let existed = self.ledger.reset_community(community);
        if existed {
            info!("community {community} leaderboard reset");
            self.persistence.mark_dirty();
        }
        existed
    }

    /// Privileged: shift a player's bait pool by `delta`, clamped to `[0, cap]`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownPlayer`] for a player never seen.
    pub fn adjust_resource_pool(
        &mut self,
        player: &PlayerId,
        delta: i64,
        now: Timestamp,
    ) -> Result<u32, EngineError> {
        let schedule = self.config.schedule();
        let state = self
            .ledger
            .player_mut(player)
            .ok_or_else(|| EngineError::UnknownPlayer(player.clone()))?;
        scheduler::regenerate(state, now, &schedule);
        let before = state.resource_pool;
        state.resource_pool = clamp_pool(before, delta, schedule.max_bait);
        let pool = state.resource_pool;
        info!("bait for {player} adjusted {before} -> {pool}");
        self.persistence.mark_dirty();
        Ok(pool)
    }

    /// Consistent copy of the full state.
    #[must_use]
    pub fn snapshot(&self) -> FullState {
        self.ledger.state().clone()
    }

    #[must_use]
    pub fn state_digest(&self) -> u64 {
        self.ledger.state().digest()
    }

    /// Check every player's invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn audit(&self) -> Result<(), EngineError> {
        self.ledger
            .audit(self.config.max_bait, self.config.inventory_capacity)
            .map_err(|(player, violation)| EngineError::Invariant { player, violation })
    }

    /// Storage collaborator shared with off-thread writers.
    #[must_use]
    pub fn storage(&self) -> Arc<S> {
        self.persistence.storage()
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.persistence.tracker().is_dirty()
    }

    pub fn maybe_flush(&mut self, now: Timestamp) -> FlushOutcome {
        self.persistence.maybe_flush(now, self.ledger.state())
    }

    /// Blocking write of the current state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] if storage rejects the write.
    pub fn force_flush(&mut self, now: Timestamp) -> Result<u64, EngineError> {
        self.persistence
            .force_flush(now, self.ledger.state())
            .map_err(EngineError::Persist)
    }

    /// Snapshot for a flush performed outside the engine, if anything is dirty.
    #[must_use]
    pub fn prepare_flush(&self) -> Option<(FlushTicket, FullState, Arc<S>)> {
        self.persistence
            .begin()
            .map(|ticket| (ticket, self.snapshot(), self.persistence.storage()))
    }

    /// Record the outcome of a flush started with [`Self::prepare_flush`].
    pub fn finish_flush(
        &mut self,
        ticket: FlushTicket,
        result: Result<u64, Box<dyn std::error::Error + Send + Sync>>,
        now: Timestamp,
    ) {
        match result {
            Ok(digest) => self.persistence.complete(ticket, now, digest),
            Err(err) => self.persistence.fail(now, err.as_ref()),
        }
    }

    /// Final synchronous flush. Returns the digest of what was written.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persist`] if the final write fails.
    pub fn shutdown(mut self, now: Timestamp) -> Result<u64, EngineError> {
        let digest = self.force_flush(now)?;
        info!("engine shut down, final state digest {digest:016x}");
        Ok(digest)
    }
}
