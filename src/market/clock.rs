//! Deterministic 15-minute market window math.
//!
//! Markets run on fixed wall-clock windows (:00-:15, :15-:30, ...).
//! When a live market object carries an end date, that end date is the
//! true settlement instant and overrides the clock-derived remaining.

use crate::types::Market;

/// Window length for the markets this engine trades.
pub const WINDOW_MS: i64 = 15 * 60 * 1000;

/// (start_ms, end_ms) of the window containing `now_ms`.
pub fn window_bounds(now_ms: i64) -> (i64, i64) {
    let start = (now_ms / WINDOW_MS) * WINDOW_MS;
    (start, start + WINDOW_MS)
}

/// Minutes elapsed since the window opened.
pub fn elapsed_min(now_ms: i64) -> f64 {
    let (start, _) = window_bounds(now_ms);
    (now_ms - start) as f64 / 60_000.0
}

/// Minutes until the window closes (clock-derived).
pub fn remaining_min(now_ms: i64) -> f64 {
    let (_, end) = window_bounds(now_ms);
    (end - now_ms) as f64 / 60_000.0
}

/// Minutes until settlement. A market end date, when present, defines
/// the true settlement instant; otherwise fall back to the clock window.
pub fn time_left_min(now_ms: i64, market: Option<&Market>) -> f64 {
    match market {
        Some(m) if m.end_date_ms > 0 => (m.end_date_ms - now_ms) as f64 / 60_000.0,
        _ => remaining_min(now_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Market;

    fn market_ending_at(end_date_ms: i64) -> Market {
        Market {
            slug: "btc-updown-test".into(),
            question: "Bitcoin Up or Down?".into(),
            outcomes: vec!["Up".into(), "Down".into()],
            clob_token_ids: vec!["1".into(), "2".into()],
            end_date_ms,
            metadata: Default::default(),
        }
    }

    #[test]
    fn bounds_align_to_quarter_hours() {
        // 12:07:30 UTC on some day
        let now = 1_700_000_000_000i64;
        let (start, end) = window_bounds(now);
        assert_eq!(start % WINDOW_MS, 0);
        assert_eq!(end - start, WINDOW_MS);
        assert!(start <= now && now < end);
    }

    #[test]
    fn boundary_instant_starts_a_new_window() {
        let start = 1_700_000_100_000i64 / WINDOW_MS * WINDOW_MS;
        let (s, e) = window_bounds(start);
        assert_eq!(s, start);
        assert_eq!(e, start + WINDOW_MS);
        assert!((remaining_min(start) - 15.0).abs() < 1e-9);
        assert!(elapsed_min(start).abs() < 1e-9);
    }

    #[test]
    fn market_end_date_overrides_clock() {
        let now = 1_700_000_000_000i64;
        let market = market_ending_at(now + 90_000);
        assert!((time_left_min(now, Some(&market)) - 1.5).abs() < 1e-9);
        // Past expiry the value goes negative; settlement logic keys on <= 0.
        let expired = market_ending_at(now - 60_000);
        assert!(time_left_min(now, Some(&expired)) < 0.0);
    }

    #[test]
    fn clock_fallback_without_market() {
        let now = 1_700_000_000_000i64;
        let left = time_left_min(now, None);
        assert!(left > 0.0 && left <= 15.0);
    }
}
