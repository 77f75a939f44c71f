//! Strategy evaluator - time-bucketed decision tree.
//!
//! One pass per slow tick: dispatch on minutes-to-settlement, try the
//! strategies that own that bucket in order, and return the first ENTER
//! or the last decline reason. Every branch reports a human-readable
//! reason so the dashboard and logs can explain each NO_TRADE.
//!
//! | time left (min) | tried in order              |
//! |-----------------|-----------------------------|
//! | >= 2.0          | Momentum                    |
//! | 0.5 - 2.0       | Sniper, then Momentum       |
//! | 1.0 - 1.5       | Late Window (as a fallback) |
//! | < 0.5           | no trade                    |

pub mod probability;

use crate::config::StrategyConfig;
use crate::types::{Confidence, Direction, Recommendation, Snapshot, StrategyTag};

/// Evaluate one snapshot into a recommendation.
pub fn evaluate(snapshot: &Snapshot, cfg: &StrategyConfig) -> Recommendation {
    if snapshot.candles.len() < cfg.min_candles
        || !snapshot.indicators.is_formed()
        || !snapshot.odds.is_complete()
    {
        return Recommendation::no_trade("missing_data");
    }

    let t = snapshot.time_left_min;
    let mut rec = if t >= 2.0 {
        momentum(snapshot, cfg)
    } else if t >= 0.5 {
        let mut out = sniper(snapshot, cfg);
        if out.side.is_none() {
            out = momentum(snapshot, cfg);
        }
        if out.side.is_none() && (1.0..=1.5).contains(&t) {
            out = late_window(snapshot, cfg);
        }
        out
    } else {
        Recommendation::no_trade(format!("window_closing_{t:.2}min"))
    };

    attach_probability(&mut rec, snapshot);
    rec
}

/// Momentum: ride a confirmed move away from the strike while the odds
/// still leave edge on the table.
fn momentum(snapshot: &Snapshot, cfg: &StrategyConfig) -> Recommendation {
    let Some(diff) = snapshot.diff() else {
        return Recommendation::no_trade("missing_strike");
    };
    if diff.abs() <= cfg.momentum_min_diff_usd {
        return Recommendation::no_trade(format!("diff_too_small_{:.0}", diff.abs()));
    }
    let side = if diff > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    };
    let strike = snapshot.strike.unwrap_or_default();

    // Last two closed candles must sit strictly on our side of the strike.
    let closes: Vec<f64> = snapshot.candles.iter().map(|c| c.close).collect();
    if closes.len() < 2 {
        return Recommendation::no_trade("not_enough_closed_candles");
    }
    let aligned = closes[closes.len() - 2..].iter().all(|close| match side {
        Direction::Up => *close > strike,
        Direction::Down => *close < strike,
    });
    if !aligned {
        return Recommendation::no_trade(format!("candles_not_aligned_{}", side.as_lower()));
    }

    let ind = &snapshot.indicators;
    let macd = ind.macd.expect("formed bundle");
    if !macd.growing_toward(side) {
        return Recommendation::no_trade(format!("macd_not_growing_{}", side.as_lower()));
    }

    let ema21 = ind.ema21.expect("formed bundle");
    let ema_ok = match side {
        Direction::Up => snapshot.spot > ema21,
        Direction::Down => snapshot.spot < ema21,
    };
    if !ema_ok {
        return Recommendation::no_trade(format!("spot_vs_ema21_against_{}", side.as_lower()));
    }

    let run = ind.ha_run.expect("formed bundle");
    if !run.color.favors(side) || run.count < 2 {
        return Recommendation::no_trade(format!(
            "ha_run_weak_{}_{}",
            side.as_lower(),
            run.count
        ));
    }

    let rsi = ind.rsi.expect("formed bundle");
    let rsi_ok = match side {
        Direction::Up => (40.0..=80.0).contains(&rsi),
        Direction::Down => (20.0..=60.0).contains(&rsi),
    };
    if !rsi_ok {
        return Recommendation::no_trade(format!("rsi_out_of_band_{rsi:.0}"));
    }

    let odds = snapshot.odds.side(side).expect("complete odds");
    let odds_cap = cfg.momentum_max_odds.min(1.0 - cfg.min_odds_edge);
    if odds >= odds_cap {
        return Recommendation::no_trade(format!(
            "odds_too_high_{}_{odds:.2}",
            side.as_lower()
        ));
    }

    Recommendation::enter(
        side,
        StrategyTag::Momentum,
        Confidence::High,
        format!("momentum_{}_diff_{:.0}", side.as_lower(), diff.abs()),
    )
}

/// Late window: a large, quiet lead held into the final stretch.
fn late_window(snapshot: &Snapshot, cfg: &StrategyConfig) -> Recommendation {
    let Some(diff) = snapshot.diff() else {
        return Recommendation::no_trade("missing_strike");
    };
    if diff.abs() <= cfg.late_min_diff_usd {
        return Recommendation::no_trade(format!("late_diff_too_small_{:.0}", diff.abs()));
    }
    let side = if diff > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    };

    let recent = &snapshot.candles[snapshot.candles.len().saturating_sub(5)..];
    let mean_range = recent.iter().map(|c| c.range()).sum::<f64>() / recent.len().max(1) as f64;
    if mean_range > cfg.late_max_mean_range_usd {
        return Recommendation::no_trade(format!("late_too_volatile_{mean_range:.0}"));
    }

    let run = snapshot.indicators.ha_run.expect("formed bundle");
    if !run.color.favors(side) || run.count < 5 {
        return Recommendation::no_trade(format!(
            "late_ha_run_weak_{}_{}",
            side.as_lower(),
            run.count
        ));
    }

    let odds = snapshot.odds.side(side).expect("complete odds");
    if odds >= cfg.late_max_odds {
        return Recommendation::no_trade(format!(
            "odds_too_high_{}_{odds:.2}",
            side.as_lower()
        ));
    }

    Recommendation::enter(
        side,
        StrategyTag::LateWindow,
        Confidence::VeryHigh,
        format!("late_window_{}_diff_{:.0}", side.as_lower(), diff.abs()),
    )
}

/// Sniper: a long exhausted streak with RSI confirmation in the final
/// two minutes - the highest-conviction entry in the tree.
fn sniper(snapshot: &Snapshot, cfg: &StrategyConfig) -> Recommendation {
    let Some(diff) = snapshot.diff() else {
        return Recommendation::no_trade("missing_strike");
    };
    if diff.abs() <= cfg.sniper_min_diff_usd {
        return Recommendation::no_trade(format!("sniper_diff_too_small_{:.0}", diff.abs()));
    }
    let side = if diff > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    };

    let run = snapshot.indicators.ha_run.expect("formed bundle");
    if !run.color.favors(side) || run.count < 6 {
        return Recommendation::no_trade(format!(
            "sniper_ha_run_weak_{}_{}",
            side.as_lower(),
            run.count
        ));
    }

    let rsi = snapshot.indicators.rsi.expect("formed bundle");
    let rsi_ok = match side {
        Direction::Up => rsi > 60.0,
        Direction::Down => rsi < 40.0,
    };
    if !rsi_ok {
        return Recommendation::no_trade(format!("sniper_rsi_not_confirming_{rsi:.0}"));
    }

    let odds = snapshot.odds.side(side).expect("complete odds");
    if odds >= cfg.late_max_odds {
        return Recommendation::no_trade(format!(
            "odds_too_high_{}_{odds:.2}",
            side.as_lower()
        ));
    }

    Recommendation::enter(
        side,
        StrategyTag::Sniper,
        Confidence::Max,
        format!("sniper_{}_run_{}", side.as_lower(), run.count),
    )
}

/// Attach the heuristic probability and edge for the recommended side.
fn attach_probability(rec: &mut Recommendation, snapshot: &Snapshot) {
    let Some(side) = rec.side else {
        return;
    };
    let raw = probability::raw_up_score(snapshot);
    let up = probability::adjusted_up(raw, snapshot.spot, snapshot.strike, snapshot.time_left_min);
    let prob = probability::side_probability(up, side);
    rec.probability = Some(prob);
    rec.edge = snapshot
        .odds
        .side(side)
        .map(|odds| probability::edge(prob, odds));
}
