//! Player state store: per-player progress, community aggregates and queries.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::catch::{Catch, Modifier, Timestamp};
use crate::legendary::LegendaryRecord;
use crate::numbers::round_weight;
use crate::persistence::FullState;
use crate::scheduler::{self, BaitSchedule};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Chat-platform player identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

/// Chat community (group) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommunityId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(PlayerId);
string_id!(CommunityId);

/// Authoritative per-player progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub display_name: String,
    #[serde(default)]
    pub inventory: Vec<Catch>,
    /// All-time weight; eviction never reduces it.
    #[serde(default)]
    pub aggregate_weight: f64,
    /// Sum of weights currently held in `inventory`.
    #[serde(default)]
    pub inventory_weight: f64,
    #[serde(default)]
    pub biggest_catch: Option<Catch>,
    #[serde(default)]
    pub total_catches: u64,
    #[serde(default)]
    pub total_trash_caught: u64,
    #[serde(default)]
    pub total_resource_used: u64,
    pub resource_pool: u32,
    pub last_resource_regen_at: Timestamp,
    #[serde(default)]
    pub next_allowed_at: Timestamp,
    #[serde(default)]
    pub active_buffs: Vec<Modifier>,
    #[serde(default)]
    pub active_debuffs: Vec<Modifier>,
}

/// Broken state detected after an action; the action is rolled back.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("bait pool {pool} exceeds cap {cap}")]
    PoolOverCap { pool: u32, cap: u32 },
    #[error("inventory holds {len} items, capacity is {capacity}")]
    InventoryOverCapacity { len: usize, capacity: usize },
    #[error("inventory weight {recorded} does not match held total {actual}")]
    InventoryWeightDrift { recorded: f64, actual: f64 },
    #[error("spent modifier left active: {0}")]
    SpentModifier(String),
}

impl PlayerState {
    /// Fresh player with a full bait pool.
    #[must_use]
    pub fn new(display_name: impl Into<String>, now: Timestamp, schedule: &BaitSchedule) -> Self {
        Self {
            display_name: display_name.into(),
            inventory: Vec::new(),
            aggregate_weight: 0.0,
            inventory_weight: 0.0,
            biggest_catch: None,
            total_catches: 0,
            total_trash_caught: 0,
            total_resource_used: 0,
            resource_pool: schedule.max_bait,
            last_resource_regen_at: now,
            next_allowed_at: 0,
            active_buffs: Vec::new(),
            active_debuffs: Vec::new(),
        }
    }

    /// Add a catch to stats and inventory, evicting the lightest item if over capacity.
    pub fn record_catch(&mut self, catch: Catch, capacity: usize) -> Option<Catch> {
        self.total_catches = self.total_catches.saturating_add(1);
        self.aggregate_weight = round_weight(self.aggregate_weight + catch.weight);
        self.inventory_weight = round_weight(self.inventory_weight + catch.weight);
        if is_new_record(self.biggest_catch.as_ref(), &catch) {
            self.biggest_catch = Some(catch.clone());
        }
        self.inventory.push(catch);
        self.evict_if_over_capacity(capacity)
    }

    /// Remove exactly one minimum-weight item (first found) when over capacity.
    pub fn evict_if_over_capacity(&mut self, capacity: usize) -> Option<Catch> {
        if self.inventory.len() <= capacity {
            return None;
        }
        let mut lightest = 0;
        for (index, item) in self.inventory.iter().enumerate().skip(1) {
            if item.weight < self.inventory[lightest].weight {
                lightest = index;
            }
        }
        let evicted = self.inventory.remove(lightest);
        self.inventory_weight = round_weight((self.inventory_weight - evicted.weight).max(0.0));
        Some(evicted)
    }

    /// Drop every held catch; all-time weight shrinks by the cleared amount.
    ///
    /// Returns the number of items and the weight removed.
    pub fn clear_inventory(&mut self) -> (usize, f64) {
        let items = self.inventory.len();
        let weight = round_weight(self.inventory.iter().map(|c| c.weight).sum());
        self.inventory.clear();
        self.inventory_weight = 0.0;
        self.aggregate_weight = round_weight((self.aggregate_weight - weight).max(0.0));
        (items, weight)
    }

    /// Add a modifier to the end of the buff or debuff list.
    pub fn push_modifier(&mut self, modifier: Modifier, buff: bool) {
        if buff {
            self.active_buffs.push(modifier);
        } else {
            self.active_debuffs.push(modifier);
        }
    }

    /// Validate the per-player invariants.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found.
    pub fn check_invariants(&self, max_bait: u32, capacity: usize) -> Result<(), InvariantViolation> {
        if self.resource_pool > max_bait {
            return Err(InvariantViolation::PoolOverCap {
                pool: self.resource_pool,
                cap: max_bait,
            });
        }
        if self.inventory.len() > capacity {
            return Err(InvariantViolation::InventoryOverCapacity {
                len: self.inventory.len(),
                capacity,
            });
        }
        let actual = round_weight(self.inventory.iter().map(|c| c.weight).sum());
        if (actual - self.inventory_weight).abs() > WEIGHT_TOLERANCE {
            return Err(InvariantViolation::InventoryWeightDrift {
                recorded: self.inventory_weight,
                actual,
            });
        }
        if let Some(spent) = self
            .active_buffs
            .iter()
            .chain(&self.active_debuffs)
            .find(|m| m.is_spent())
        {
            return Err(InvariantViolation::SpentModifier(spent.to_string()));
        }
        Ok(())
    }
}

/// Per-community leaderboard mirror of a player's progress. Never evicted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommunityAggregate {
    pub display_name: String,
    #[serde(default)]
    pub total_weight: f64,
    #[serde(default)]
    pub total_catches: u64,
    #[serde(default)]
    pub biggest_catch: Option<Catch>,
}

impl CommunityAggregate {
    fn record(&mut self, display_name: &str, catch: &Catch) {
        display_name.clone_into(&mut self.display_name);
        self.total_catches = self.total_catches.saturating_add(1);
        self.total_weight = round_weight(self.total_weight + catch.weight);
        if is_new_record(self.biggest_catch.as_ref(), catch) {
            self.biggest_catch = Some(catch.clone());
        }
    }
}

fn is_new_record(current: Option<&Catch>, candidate: &Catch) -> bool {
    current.is_none_or(|best| candidate.weight > best.weight)
}

/// Sort key for community leaderboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardKey {
    #[default]
    TotalWeight,
    TotalCatches,
    BiggestCatch,
}

impl std::str::FromStr for LeaderboardKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weight" | "total_weight" => Ok(Self::TotalWeight),
            "catches" | "total_catches" => Ok(Self::TotalCatches),
            "biggest" | "biggest_catch" => Ok(Self::BiggestCatch),
            other => Err(format!("unknown leaderboard key: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player_id: PlayerId,
    pub display_name: String,
    pub total_weight: f64,
    pub total_catches: u64,
    pub biggest_catch: Option<Catch>,
}

/// Read-only view of one player, with bait regeneration applied to a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub player_id: PlayerId,
    pub display_name: String,
    pub bait: u32,
    pub max_bait: u32,
    pub next_bait_at: Option<Timestamp>,
    pub cooldown_ready_at: Option<Timestamp>,
    /// Heaviest first.
    pub inventory: Vec<Catch>,
    pub inventory_weight: f64,
    pub aggregate_weight: f64,
    pub biggest_catch: Option<Catch>,
    pub total_catches: u64,
    pub total_trash_caught: u64,
    pub total_resource_used: u64,
    pub active_buffs: Vec<Modifier>,
    pub active_debuffs: Vec<Modifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaviestCatch {
    pub player_id: PlayerId,
    pub display_name: String,
    pub catch: Catch,
}

/// Totals across every player.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalStats {
    pub players: usize,
    pub communities: usize,
    pub total_catches: u64,
    pub total_weight: f64,
    pub total_trash: u64,
    pub total_bait_used: u64,
    pub legendary_count: usize,
    pub heaviest: Option<HeaviestCatch>,
}

/// In-memory owner of the full persisted document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    state: FullState,
}

impl Ledger {
    #[must_use]
    pub const fn from_state(state: FullState) -> Self {
        Self { state }
    }

    #[must_use]
    pub const fn state(&self) -> &FullState {
        &self.state
    }

    #[must_use]
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.state.players.get(id)
    }

    pub fn player_mut(&mut self, id: &PlayerId) -> Option<&mut PlayerState> {
        self.state.players.get_mut(id)
    }

    /// Fetch a player, creating one with a full pool on first sight.
    ///
    /// A non-empty `display_name` replaces the stored one.
    pub fn get_or_create(
        &mut self,
        id: &PlayerId,
        display_name: &str,
        now: Timestamp,
        schedule: &BaitSchedule,
    ) -> &mut PlayerState {
        let state = self
            .state
            .players
            .entry(id.clone())
            .or_insert_with(|| PlayerState::new(display_name, now, schedule));
        if !display_name.is_empty() && state.display_name != display_name {
            display_name.clone_into(&mut state.display_name);
        }
        state
    }

    /// Put a player record in place, or remove it with `None`.
    pub fn set_player(&mut self, id: &PlayerId, state: Option<PlayerState>) {
        match state {
            Some(state) => {
                self.state.players.insert(id.clone(), state);
            }
            None => {
                self.state.players.remove(id);
            }
        }
    }

    /// Record one catch for a player and their community aggregate.
    ///
    /// Returns the evicted catch, if the inventory overflowed.
    pub fn record_catch(
        &mut self,
        player: &PlayerId,
        community: &CommunityId,
        catch: Catch,
        capacity: usize,
    ) -> Option<Catch> {
        let state = self.state.players.get_mut(player)?;
        self.state
            .communities
            .entry(community.clone())
            .or_default()
            .entry(player.clone())
            .or_default()
            .record(&state.display_name, &catch);
        state.record_catch(catch, capacity)
    }

    #[must_use]
    pub fn community(&self, id: &CommunityId) -> Option<&BTreeMap<PlayerId, CommunityAggregate>> {
        self.state.communities.get(id)
    }

    /// Put a community's aggregates in place, or remove them with `None`.
    pub fn set_community(
        &mut self,
        id: &CommunityId,
        aggregates: Option<BTreeMap<PlayerId, CommunityAggregate>>,
    ) {
        match aggregates {
            Some(aggregates) => {
                self.state.communities.insert(id.clone(), aggregates);
            }
            None => {
                self.state.communities.remove(id);
            }
        }
    }

    /// Append a legendary record, returning its position in the log.
    pub fn append_legendary(&mut self, record: LegendaryRecord) -> usize {
        self.state.legendary_records.push(record);
        self.state.legendary_records.len() - 1
    }

    /// Fill in the artifact of a record that has none yet.
    pub fn attach_artifact(&mut self, index: usize, reference: String) -> bool {
        match self.state.legendary_records.get_mut(index) {
            Some(record) if record.artifact_ref.is_none() => {
                record.artifact_ref = Some(reference);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn legendary_records(&self) -> &[LegendaryRecord] {
        &self.state.legendary_records
    }

    /// Summarise a player as of `now` without mutating stored state.
    #[must_use]
    pub fn summary(&self, id: &PlayerId, now: Timestamp, schedule: &BaitSchedule) -> Option<PlayerSummary> {
        let mut view = self.player(id)?.clone();
        scheduler::regenerate(&mut view, now, schedule);
        let next_bait_at = scheduler::next_unit_at(&view, schedule);
        view.inventory
            .sort_by(|a, b| b.weight.total_cmp(&a.weight));
        Some(PlayerSummary {
            player_id: id.clone(),
            display_name: view.display_name,
            bait: view.resource_pool,
            max_bait: schedule.max_bait,
            next_bait_at,
            cooldown_ready_at: (view.next_allowed_at > now).then_some(view.next_allowed_at),
            inventory: view.inventory,
            inventory_weight: view.inventory_weight,
            aggregate_weight: view.aggregate_weight,
            biggest_catch: view.biggest_catch,
            total_catches: view.total_catches,
            total_trash_caught: view.total_trash_caught,
            total_resource_used: view.total_resource_used,
            active_buffs: view.active_buffs,
            active_debuffs: view.active_debuffs,
        })
    }

    /// Ranked community standings; ties fall back to player id order.
    #[must_use]
    pub fn leaderboard(&self, community: &CommunityId, key: LeaderboardKey, limit: usize) -> Vec<LeaderboardEntry> {
        let Some(members) = self.state.communities.get(community) else {
            return Vec::new();
        };
        let mut rows: Vec<(&PlayerId, &CommunityAggregate)> = members.iter().collect();
        rows.sort_by(|(a_id, a), (b_id, b)| compare_by_key(a, b, key).then_with(|| a_id.cmp(b_id)));
        rows.into_iter()
            .take(limit)
            .enumerate()
            .map(|(index, (id, aggregate))| LeaderboardEntry {
                rank: index + 1,
                player_id: id.clone(),
                display_name: aggregate.display_name.clone(),
                total_weight: aggregate.total_weight,
                total_catches: aggregate.total_catches,
                biggest_catch: aggregate.biggest_catch.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn global_stats(&self) -> GlobalStats {
        let mut stats = GlobalStats {
            players: self.state.players.len(),
            communities: self.state.communities.len(),
            legendary_count: self.state.legendary_records.len(),
            ..GlobalStats::default()
        };
        for (id, player) in &self.state.players {
            stats.total_catches = stats.total_catches.saturating_add(player.total_catches);
            stats.total_weight += player.aggregate_weight;
            stats.total_trash = stats.total_trash.saturating_add(player.total_trash_caught);
            stats.total_bait_used = stats.total_bait_used.saturating_add(player.total_resource_used);
            if let Some(best) = &player.biggest_catch
                && is_new_record(stats.heaviest.as_ref().map(|h| &h.catch), best)
            {
                stats.heaviest = Some(HeaviestCatch {
                    player_id: id.clone(),
                    display_name: player.display_name.clone(),
                    catch: best.clone(),
                });
            }
        }
        stats.total_weight = round_weight(stats.total_weight);
        stats
    }

    /// Drop every aggregate of a community. Returns whether it existed.
    pub fn reset_community(&mut self, community: &CommunityId) -> bool {
        self.state.communities.remove(community).is_some()
    }

    /// Check invariants of every player.
    ///
    /// # Errors
    ///
    /// Returns the offending player id and violation.
    pub fn audit(&self, max_bait: u32, capacity: usize) -> Result<(), (PlayerId, InvariantViolation)> {
        for (id, player) in &self.state.players {
            player
                .check_invariants(max_bait, capacity)
                .map_err(|violation| (id.clone(), violation))?;
        }
        Ok(())
    }
}

fn compare_by_key(a: &CommunityAggregate, b: &CommunityAggregate, key: LeaderboardKey) -> Ordering {
    match key {
        LeaderboardKey::TotalWeight => b.total_weight.total_cmp(&a.total_weight),
        LeaderboardKey::TotalCatches => b.total_catches.cmp(&a.total_catches),
        LeaderboardKey::BiggestCatch => {
            let weight = |agg: &CommunityAggregate| agg.biggest_catch.as_ref().map_or(0.0, |c| c.weight);
            weight(b).total_cmp(&weight(a))
        }
    }
}
