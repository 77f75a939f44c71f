//! Heuristic probability estimator (legacy scorer).
//!
//! Converts the indicator state into a raw UP score, then blends it
//! with a time-aware positional term: the closer the window is to
//! settlement, the more the current side of the strike dominates the
//! estimate. Edge is the model probability minus the market odds on
//! the same side, floored at zero for sizing.

use crate::indicators::HaColor;
use crate::types::{Direction, Snapshot};

/// Raw UP probability in [0.05, 0.95] from indicator votes alone.
pub fn raw_up_score(snapshot: &Snapshot) -> f64 {
    let ind = &snapshot.indicators;
    let mut score: f64 = 0.5;

    if let Some(vwap) = ind.vwap {
        score += if snapshot.spot > vwap { 0.10 } else { -0.10 };
    }
    if let Some(ema21) = ind.ema21 {
        score += if snapshot.spot > ema21 { 0.10 } else { -0.10 };
    }
    if let Some(rsi) = ind.rsi {
        // RSI 50 is neutral; +-0.20 at the extremes.
        score += ((rsi - 50.0) / 50.0).clamp(-1.0, 1.0) * 0.20;
    }
    if let Some(macd) = ind.macd {
        score += if macd.hist > 0.0 { 0.08 } else { -0.08 };
        if macd.hist_delta() > 0.0 {
            score += 0.04;
        } else if macd.hist_delta() < 0.0 {
            score -= 0.04;
        }
    }
    if let Some(run) = ind.ha_run {
        let weight = (run.count.min(5) as f64) * 0.02;
        score += match run.color {
            HaColor::Green => weight,
            HaColor::Red => -weight,
        };
    }

    score.clamp(0.05, 0.95)
}

/// Time-aware adjusted UP probability.
///
/// The positional term is a logistic in (spot - strike) whose scale
/// shrinks with the square root of remaining minutes: a $100 lead is
/// weak with 14 minutes left and nearly decisive with 30 seconds left.
pub fn adjusted_up(raw_up: f64, spot: f64, strike: Option<f64>, time_left_min: f64) -> f64 {
    let Some(strike) = strike else {
        return raw_up;
    };
    let diff = spot - strike;
    let scale = 40.0 * time_left_min.max(0.1).sqrt();
    let positional = 1.0 / (1.0 + (-diff / scale).exp());

    // Indicator weight decays as the window closes.
    let indicator_weight = 0.2 + 0.6 * (time_left_min / 15.0).clamp(0.0, 1.0);
    let blended = indicator_weight * raw_up + (1.0 - indicator_weight) * positional;
    blended.clamp(0.01, 0.99)
}

/// Model probability for one side.
pub fn side_probability(up: f64, side: Direction) -> f64 {
    match side {
        Direction::Up => up,
        Direction::Down => 1.0 - up,
    }
}

/// Model-vs-market edge on a side, floored at zero for Kelly sizing.
pub fn edge(probability: f64, odds: f64) -> f64 {
    (probability - odds).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{HaRun, IndicatorBundle, MacdSnapshot};
    use crate::types::{SideOdds, Snapshot, Trend};

    fn snapshot_with(spot: f64, rsi: f64, hist: f64, hist_prev: f64) -> Snapshot {
        Snapshot {
            ts_ms: 0,
            spot,
            chainlink: None,
            market: None,
            strike: None,
            odds: SideOdds::default(),
            candles: Vec::new(),
            indicators: IndicatorBundle {
                ema9: Some(spot - 10.0),
                ema21: Some(spot - 50.0),
                ema200: None,
                rsi: Some(rsi),
                rsi_series: vec![rsi],
                macd: Some(MacdSnapshot {
                    macd: 0.0,
                    signal: 0.0,
                    hist,
                    hist_prev,
                    hist_prev2: 0.0,
                }),
                ha_run: Some(HaRun {
                    color: crate::indicators::HaColor::Green,
                    count: 3,
                }),
                vwap: Some(spot - 30.0),
                vwap_series: vec![spot - 30.0],
            },
            time_left_min: 10.0,
            trend: Trend::Rising,
        }
    }

    #[test]
    fn bullish_state_scores_above_half() {
        let snap = snapshot_with(100_000.0, 65.0, 5.0, 3.0);
        let raw = raw_up_score(&snap);
        assert!(raw > 0.5, "raw={raw}");
        assert!(raw <= 0.95);
    }

    #[test]
    fn score_stays_in_bounds_at_extremes() {
        let mut snap = snapshot_with(100_000.0, 99.0, 50.0, 10.0);
        snap.indicators.ha_run = Some(HaRun {
            color: crate::indicators::HaColor::Green,
            count: 20,
        });
        assert!(raw_up_score(&snap) <= 0.95);
    }

    #[test]
    fn positional_term_dominates_near_expiry() {
        // Spot $200 above strike, bearish indicators.
        let far = adjusted_up(0.30, 100_200.0, Some(100_000.0), 14.0);
        let near = adjusted_up(0.30, 100_200.0, Some(100_000.0), 0.5);
        assert!(near > far, "near={near} far={far}");
        assert!(near > 0.7, "near-expiry lead should be decisive: {near}");
    }

    #[test]
    fn adjustment_without_strike_is_identity() {
        assert_eq!(adjusted_up(0.42, 100_000.0, None, 5.0), 0.42);
    }

    #[test]
    fn edge_is_floored_at_zero() {
        assert_eq!(edge(0.70, 0.60), 0.70 - 0.60);
        assert_eq!(edge(0.40, 0.60), 0.0);
    }

    #[test]
    fn down_probability_complements_up() {
        let up = 0.64;
        assert!((side_probability(up, Direction::Down) - 0.36).abs() < 1e-12);
    }
}
