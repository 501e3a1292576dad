//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

use crate::constants::WEIGHT_DECIMALS;

/// Round a weight to the displayed precision, returning 0.0 for non-finite values.
#[must_use]
pub fn round_weight(value: f64) -> f64 {
    round_to_places(value, WEIGHT_DECIMALS)
}

/// Round a f64 to `places` decimal places, returning 0.0 for non-finite values.
#[must_use]
pub fn round_to_places(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scale = 10_f64.powi(places);
    let rounded = (value * scale).round() / scale;
    if rounded.is_finite() { rounded } else { value }
}

/// Whole periods elapsed between two millisecond timestamps, clamped to the u32 range.
///
/// Negative elapsed time (clock skew) yields zero.
#[must_use]
pub fn whole_periods(elapsed_ms: i64, period_ms: i64) -> u32 {
    if elapsed_ms <= 0 || period_ms <= 0 {
        return 0;
    }
    let periods = elapsed_ms / period_ms;
    cast::<i64, u32>(periods).unwrap_or(u32::MAX)
}

/// Convert seconds to milliseconds for timestamp arithmetic.
#[must_use]
pub fn secs_to_ms(secs: u32) -> i64 {
    i64::from(secs).saturating_mul(1_000)
}

/// Apply a signed delta to an unsigned pool, clamping into `[0, cap]`.
#[must_use]
pub fn clamp_pool(current: u32, delta: i64, cap: u32) -> u32 {
    let next = i64::from(current).saturating_add(delta);
    let clamped = next.clamp(0, i64::from(cap));
    cast::<i64, u32>(clamped).unwrap_or(0)
}
