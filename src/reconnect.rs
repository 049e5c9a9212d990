//! Reconnection backoff — decorrelated-jitter exponential delay.
//!
//! Extracted from the teacher's `backoff_sleep`/`calculate_backoff_delay` (duplicated
//! across `ws::native` and `ws::wasm`, each hardcoding its own sleep primitive) into
//! one pure, synchronous, transport-agnostic function. The async sleep site (native
//! `tokio::time::sleep`, WASM `gloo_timers::future`) calls this to get the duration,
//! same formula either way.

use std::time::Duration;

/// `delay(n) = min(cap, base * 2^min(n, 10) + jitter)`, `jitter ∈ [0, jitter_max)`.
///
/// `attempt` is 1-indexed (the first retry is attempt 1), matching the teacher's
/// `reconnect_attempts` counter semantics.
pub fn next_delay(attempt: u32, base_ms: u64, cap_ms: u64, jitter_max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    let base = base_ms.saturating_mul(1u64 << exp);
    let jitter = if jitter_max_ms == 0 { 0 } else { rand::random::<u64>() % jitter_max_ms };
    let delay = base.saturating_add(jitter).min(cap_ms);
    Duration::from_millis(delay)
}

/// Jitter/cap pair used for a normal (non-rate-limited) reconnect attempt.
pub const NORMAL_JITTER_MAX_MS: u64 = 500;
pub const NORMAL_CAP_MS: u64 = 60_000;

/// Jitter/cap pair used when the transport closed due to rate limiting — a wider
/// spread and a much longer cap, matching the teacher's rate-limit branch.
pub const RATE_LIMITED_JITTER_MAX_MS: u64 = 1_000;
pub const RATE_LIMITED_CAP_MS: u64 = 300_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially_before_cap() {
        let d1 = next_delay(1, 1000, 60_000, 0);
        let d2 = next_delay(2, 1000, 60_000, 0);
        let d3 = next_delay(3, 1000, 60_000, 0);
        assert_eq!(d1, Duration::from_millis(1000));
        assert_eq!(d2, Duration::from_millis(2000));
        assert_eq!(d3, Duration::from_millis(4000));
    }

    #[test]
    fn test_delay_caps_at_configured_maximum() {
        let d = next_delay(50, 1000, 60_000, 0);
        assert_eq!(d, Duration::from_millis(60_000));
    }

    #[test]
    fn test_delay_exponent_clamps_at_ten() {
        let d_at_11 = next_delay(11, 1, 1_000_000, 0);
        let d_at_30 = next_delay(30, 1, 1_000_000, 0);
        assert_eq!(d_at_11, d_at_30);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for attempt in 1..5 {
            let d = next_delay(attempt, 0, 1_000_000, 500);
            assert!(d.as_millis() < 500);
        }
    }

    #[test]
    fn test_rate_limited_constants_are_wider() {
        assert!(RATE_LIMITED_CAP_MS > NORMAL_CAP_MS);
        assert!(RATE_LIMITED_JITTER_MAX_MS > NORMAL_JITTER_MAX_MS);
    }
}
