//! Bait regeneration and cast cooldown gating.
//!
//! Regeneration is computed lazily from elapsed time on every access; there is
//! no per-player background tick. All functions here are pure or mutate only
//! the [`PlayerState`] they are handed.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catch::Timestamp;
use crate::constants::{BAIT_REGEN_PERIOD_MS, CAST_COOLDOWN_SECS, MAX_BAIT};
use crate::numbers::{secs_to_ms, whole_periods};
use crate::state::PlayerState;

/// Bait cap, regeneration period and cooldown in effect for an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaitSchedule {
    pub max_bait: u32,
    pub regen_period_ms: i64,
    pub cooldown_secs: u32,
}

impl Default for BaitSchedule {
    fn default() -> Self {
        Self {
            max_bait: MAX_BAIT,
            regen_period_ms: BAIT_REGEN_PERIOD_MS,
            cooldown_secs: CAST_COOLDOWN_SECS,
        }
    }
}

/// Why an action was turned away at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Cast attempted before the cooldown elapsed.
    Cooldown { ready_at: Timestamp },
    /// Bait pool is empty.
    NoResource { next_unit_at: Timestamp },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown { .. } => f.write_str("line still settling"),
            Self::NoResource { .. } => f.write_str("out of bait"),
        }
    }
}

/// Pure regeneration step over `(pool, last_regen_at, now)`.
///
/// Whole elapsed periods are added to the pool and `last_regen_at` advances by
/// exactly those periods, keeping partial progress. A pool at (or reaching)
/// the cap resets `last_regen_at` to `now` so no backlog accrues while full.
#[must_use]
pub fn regenerate_pool(
    pool: u32,
    last_regen_at: Timestamp,
    now: Timestamp,
    schedule: &BaitSchedule,
) -> (u32, Timestamp) {
    if pool >= schedule.max_bait {
        return (schedule.max_bait, now);
    }
    let units = whole_periods(now.saturating_sub(last_regen_at), schedule.regen_period_ms);
    if units == 0 {
        return (pool, last_regen_at);
    }
    let refilled = pool.saturating_add(units);
    if refilled >= schedule.max_bait {
        return (schedule.max_bait, now);
    }
    let advanced = last_regen_at.saturating_add(i64::from(units).saturating_mul(schedule.regen_period_ms));
    (refilled, advanced)
}

/// Bring a player's bait pool up to date. Idempotent for a fixed `now`.
pub fn regenerate(state: &mut PlayerState, now: Timestamp, schedule: &BaitSchedule) {
    let (pool, last) = regenerate_pool(state.resource_pool, state.last_resource_regen_at, now, schedule);
    state.resource_pool = pool;
    state.last_resource_regen_at = last;
}

/// Timestamp at which the next bait unit lands, or `None` when the pool is full.
#[must_use]
pub fn next_unit_at(state: &PlayerState, schedule: &BaitSchedule) -> Option<Timestamp> {
    (state.resource_pool < schedule.max_bait)
        .then(|| state.last_resource_regen_at.saturating_add(schedule.regen_period_ms))
}

/// Check cooldown first, then bait. Expects an already regenerated state.
///
/// # Errors
///
/// Returns the [`RejectReason`] when the action may not proceed.
pub fn gate(state: &PlayerState, now: Timestamp, schedule: &BaitSchedule) -> Result<(), RejectReason> {
    if now < state.next_allowed_at {
        return Err(RejectReason::Cooldown {
            ready_at: state.next_allowed_at,
        });
    }
    if state.resource_pool == 0 {
        let next_unit_at = state
            .last_resource_regen_at
            .saturating_add(schedule.regen_period_ms);
        return Err(RejectReason::NoResource { next_unit_at });
    }
    Ok(())
}

/// Whether an action would pass the gate right now.
#[must_use]
pub fn can_act(state: &PlayerState, now: Timestamp, schedule: &BaitSchedule) -> bool {
    gate(state, now, schedule).is_ok()
}

/// Start the cast cooldown at `now`.
pub fn consume_cooldown(state: &mut PlayerState, now: Timestamp, cooldown_secs: u32) {
    state.next_allowed_at = now.saturating_add(secs_to_ms(cooldown_secs));
}

/// Charge one admitted action: one bait unit and the cooldown.
///
/// A double catch still costs a single unit.
pub fn charge_action(state: &mut PlayerState, now: Timestamp, schedule: &BaitSchedule) {
    state.resource_pool = state.resource_pool.saturating_sub(1);
    state.total_resource_used = state.total_resource_used.saturating_add(1);
    consume_cooldown(state, now, schedule.cooldown_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: i64 = BAIT_REGEN_PERIOD_MS;

    fn player(pool: u32, last: Timestamp) -> PlayerState {
        let mut state = PlayerState::new("Tester", last, &BaitSchedule::default());
        state.resource_pool = pool;
        state
    }

    #[test]
    fn regeneration_keeps_partial_progress() {
        let schedule = BaitSchedule::default();
        let (pool, last) = regenerate_pool(2, 0, PERIOD * 3 + 500, &schedule);
        assert_eq!(pool, 5);
        assert_eq!(last, PERIOD * 3);
    }

    #[test]
    fn regeneration_caps_and_resets_clock() {
        let schedule = BaitSchedule::default();
        let (pool, last) = regenerate_pool(8, 0, PERIOD * 5 + 7, &schedule);
        assert_eq!(pool, schedule.max_bait);
        assert_eq!(last, PERIOD * 5 + 7);

        let (pool, last) = regenerate_pool(schedule.max_bait, 0, 42, &schedule);
        assert_eq!((pool, last), (schedule.max_bait, 42));
    }

    #[test]
    fn regeneration_is_idempotent_and_monotonic() {
        let schedule = BaitSchedule::default();
        for (pool, last, now) in [(0, 0, PERIOD - 1), (3, 100, PERIOD * 2 + 100), (9, 0, PERIOD * 40), (4, 500, 0)] {
            let once = regenerate_pool(pool, last, now, &schedule);
            let twice = regenerate_pool(once.0, once.1, now, &schedule);
            assert_eq!(once, twice);
            assert!(once.0 >= pool.min(schedule.max_bait));
        }
    }

    #[test]
    fn clock_skew_adds_nothing() {
        let schedule = BaitSchedule::default();
        assert_eq!(regenerate_pool(3, 10_000, 5_000, &schedule), (3, 10_000));
    }

    #[test]
    fn gate_checks_cooldown_before_bait() {
        let schedule = BaitSchedule::default();
        let mut state = player(0, 0);
        state.next_allowed_at = 1_000;
        assert_eq!(
            gate(&state, 500, &schedule),
            Err(RejectReason::Cooldown { ready_at: 1_000 })
        );
        assert_eq!(
            gate(&state, 1_000, &schedule),
            Err(RejectReason::NoResource { next_unit_at: PERIOD })
        );
        state.resource_pool = 1;
        assert!(can_act(&state, 1_000, &schedule));
    }

    #[test]
    fn charging_spends_one_unit_and_sets_cooldown() {
        let schedule = BaitSchedule::default();
        let mut state = player(4, 0);
        charge_action(&mut state, 10_000, &schedule);
        assert_eq!(state.resource_pool, 3);
        assert_eq!(state.total_resource_used, 1);
        assert_eq!(state.next_allowed_at, 10_000 + secs_to_ms(schedule.cooldown_secs));
        assert_eq!(next_unit_at(&state, &schedule), Some(PERIOD));
    }
}
