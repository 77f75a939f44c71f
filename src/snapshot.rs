//! Snapshot assembly: one consistent view per slow tick.
//!
//! Builds the indicator bundle from the candle window and stitches
//! spot/chainlink/market/strike/odds into the structure the strategy
//! evaluator consumes. All numeric work is synchronous; fetching is
//! the orchestrator's job.

use crate::indicators::{self, IndicatorBundle};
use crate::market::clock;
use crate::types::{Candle, Market, SideOdds, Snapshot, Trend};

/// How many closed candles the assembler wants available.
pub const CANDLE_WINDOW: usize = 240;

/// RSI period used across the engine.
pub const RSI_PERIOD: usize = 14;

/// Build the full indicator bundle over the candle window.
/// `vwap_window` bounds the rolling "session" for VWAP (in candles).
pub fn build_indicators(candles: &[Candle], vwap_window: usize) -> IndicatorBundle {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let vwap_slice = if candles.len() > vwap_window {
        &candles[candles.len() - vwap_window..]
    } else {
        candles
    };
    let vwap_series = indicators::vwap_series(vwap_slice);
    let ha = indicators::heiken_ashi(candles);

    IndicatorBundle {
        ema9: indicators::ema(&closes, 9),
        ema21: indicators::ema(&closes, 21),
        ema200: indicators::ema(&closes, 200),
        rsi: indicators::rsi(&closes, RSI_PERIOD),
        rsi_series: indicators::rsi_series(&closes, RSI_PERIOD),
        macd: indicators::macd(&closes, 12, 26, 9),
        ha_run: indicators::count_consecutive(&ha),
        vwap: vwap_series.last().copied(),
        vwap_series,
    }
}

/// Assemble the snapshot for this tick.
#[allow(clippy::too_many_arguments)]
pub fn assemble(
    now_ms: i64,
    spot: f64,
    chainlink: Option<f64>,
    market: Option<Market>,
    strike: Option<f64>,
    odds: SideOdds,
    candles: Vec<Candle>,
    vwap_window: usize,
) -> Snapshot {
    let indicators = build_indicators(&candles, vwap_window);
    let trend = match indicators.ema21 {
        Some(ema21) if spot > ema21 => Trend::Rising,
        _ => Trend::Falling,
    };
    let time_left_min = clock::time_left_min(now_ms, market.as_ref());

    Snapshot {
        ts_ms: now_ms,
        spot,
        chainlink,
        market,
        strike,
        odds,
        candles,
        indicators,
        time_left_min,
        trend,
    }
}
