//! Technical indicator library
//!
//! Pure, deterministic functions over finite candle/close sequences.
//! No I/O, no hidden state: callers pass the window they want analyzed
//! (the snapshot assembler feeds the last 240 closes, and a 60-candle
//! slice for the rolling VWAP).

use serde::{Deserialize, Serialize};

use crate::types::{Candle, Direction};

/// Exponential moving average of the final sample.
///
/// Seeded with the SMA of the first `n` samples, then
/// `ema = alpha * x + (1 - alpha) * prev` with `alpha = 2 / (n + 1)`.
/// Returns None when fewer than `n` samples are available.
pub fn ema(series: &[f64], n: usize) -> Option<f64> {
    ema_series(series, n).last().copied()
}

/// Running EMA values from the seed point onward.
///
/// The first element is the SMA seed over `series[0..n]`; empty when
/// the series is shorter than `n`.
pub fn ema_series(series: &[f64], n: usize) -> Vec<f64> {
    if n == 0 || series.len() < n {
        return Vec::new();
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let seed = series[..n].iter().sum::<f64>() / n as f64;
    let mut out = Vec::with_capacity(series.len() - n + 1);
    let mut prev = seed;
    out.push(prev);
    for x in &series[n..] {
        prev = alpha * x + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Wilder's RSI of the final sample.
///
/// Simple averages of the first `n` gains/losses seed the smoothing.
/// Returns None when `closes.len() <= n`.
pub fn rsi(closes: &[f64], n: usize) -> Option<f64> {
    rsi_series(closes, n).last().copied()
}

/// Full Wilder RSI series (one value per close after the seed window).
pub fn rsi_series(closes: &[f64], n: usize) -> Vec<f64> {
    if n == 0 || closes.len() <= n {
        return Vec::new();
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=n {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses += -change;
        }
    }
    let mut avg_gain = gains / n as f64;
    let mut avg_loss = losses / n as f64;

    let mut out = Vec::with_capacity(closes.len() - n);
    out.push(rsi_from_averages(avg_gain, avg_loss));

    for i in (n + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
        out.push(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss < 1e-12 && avg_gain < 1e-12 {
        return 50.0;
    }
    if avg_loss < 1e-12 {
        return 100.0;
    }
    if avg_gain < 1e-12 {
        return 0.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// MACD state at the last close, with enough history for growth checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdSnapshot {
    pub macd: f64,
    pub signal: f64,
    pub hist: f64,
    pub hist_prev: f64,
    pub hist_prev2: f64,
}

impl MacdSnapshot {
    pub fn hist_delta(&self) -> f64 {
        self.hist - self.hist_prev
    }

    /// Histogram strictly growing on the given side of zero for the
    /// last two samples (the momentum strategy's growth gate).
    pub fn growing_toward(&self, side: Direction) -> bool {
        match side {
            Direction::Up => self.hist > self.hist_prev && self.hist_prev > 0.0,
            Direction::Down => self.hist < self.hist_prev && self.hist_prev < 0.0,
        }
    }
}

/// MACD of the final sample: `macd = EMA_fast - EMA_slow`, signal is the
/// EMA of the macd series. Needs at least three histogram samples so the
/// caller can test monotonic growth; None otherwise.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_n: usize) -> Option<MacdSnapshot> {
    if closes.len() < slow + signal_n + 2 {
        return None;
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    // Align: slow_series starts (slow - fast) samples later.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal_n);
    if signal_series.len() < 3 {
        return None;
    }
    let macd_off = macd_line.len() - signal_series.len();
    let hist_at = |back: usize| {
        let i = signal_series.len() - 1 - back;
        macd_line[macd_off + i] - signal_series[i]
    };

    Some(MacdSnapshot {
        macd: *macd_line.last()?,
        signal: *signal_series.last()?,
        hist: hist_at(0),
        hist_prev: hist_at(1),
        hist_prev2: hist_at(2),
    })
}

/// Heiken-Ashi candle color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaColor {
    Green,
    Red,
}

impl HaColor {
    /// The direction this color argues for
    pub fn favors(&self, side: Direction) -> bool {
        matches!(
            (self, side),
            (HaColor::Green, Direction::Up) | (HaColor::Red, Direction::Down)
        )
    }
}

/// A Heiken-Ashi transformed candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HaCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl HaCandle {
    /// Green iff ha_close >= ha_open
    pub fn color(&self) -> HaColor {
        if self.close >= self.open {
            HaColor::Green
        } else {
            HaColor::Red
        }
    }
}

/// The trailing same-color streak of a Heiken-Ashi series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HaRun {
    pub color: HaColor,
    pub count: usize,
}

/// Transform candles into Heiken-Ashi candles.
///
/// ha_close = (o+h+l+c)/4; ha_open recurses on the previous HA candle
/// (first ha_open = (o+c)/2); high/low absorb the HA open/close.
pub fn heiken_ashi(candles: &[Candle]) -> Vec<HaCandle> {
    let mut out: Vec<HaCandle> = Vec::with_capacity(candles.len());
    for (i, c) in candles.iter().enumerate() {
        let ha_close = (c.open + c.high + c.low + c.close) / 4.0;
        let ha_open = match out.get(i.wrapping_sub(1)) {
            Some(prev) => (prev.open + prev.close) / 2.0,
            None => (c.open + c.close) / 2.0,
        };
        out.push(HaCandle {
            open: ha_open,
            high: c.high.max(ha_open).max(ha_close),
            low: c.low.min(ha_open).min(ha_close),
            close: ha_close,
        });
    }
    out
}

/// Run length and color of the last same-color streak.
pub fn count_consecutive(ha: &[HaCandle]) -> Option<HaRun> {
    let last = ha.last()?;
    let color = last.color();
    let count = ha
        .iter()
        .rev()
        .take_while(|c| c.color() == color)
        .count();
    Some(HaRun { color, count })
}

/// Volume-weighted average price over the given candles:
/// sum(typical * volume) / sum(volume), typical = (h+l+c)/3.
pub fn session_vwap(candles: &[Candle]) -> Option<f64> {
    vwap_series(candles).last().copied()
}

/// Running VWAP at each step (for slope checks).
pub fn vwap_series(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    let mut sum_pv = 0.0;
    let mut sum_vol = 0.0;
    for c in candles {
        let typical = (c.high + c.low + c.close) / 3.0;
        sum_pv += typical * c.volume;
        sum_vol += c.volume;
        if sum_vol > 0.0 {
            out.push(sum_pv / sum_vol);
        }
    }
    out
}

/// Average per-step slope over the last `k` steps:
/// `(series[-1] - series[-1-k]) / k`. None when the series is too short.
pub fn slope_last(series: &[f64], k: usize) -> Option<f64> {
    if k == 0 || series.len() < k + 1 {
        return None;
    }
    let last = series[series.len() - 1];
    let ref_val = series[series.len() - 1 - k];
    Some((last - ref_val) / k as f64)
}

/// Everything the strategy evaluator reads, computed once per slow tick.
#[derive(Debug, Clone, Default)]
pub struct IndicatorBundle {
    pub ema9: Option<f64>,
    pub ema21: Option<f64>,
    pub ema200: Option<f64>,
    pub rsi: Option<f64>,
    pub rsi_series: Vec<f64>,
    pub macd: Option<MacdSnapshot>,
    pub ha_run: Option<HaRun>,
    pub vwap: Option<f64>,
    pub vwap_series: Vec<f64>,
}

impl IndicatorBundle {
    /// The evaluator's precondition: every gate it reads is present.
    /// ema200 needs 200 candles of warmup so it is deliberately not
    /// part of the formed check.
    pub fn is_formed(&self) -> bool {
        self.ema9.is_some()
            && self.ema21.is_some()
            && self.rsi.is_some()
            && self.macd.is_some()
            && self.ha_run.is_some()
            && self.vwap.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candle(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn ema_seeds_with_sma_then_smooths() {
        // EMA([1..10], 3): seed SMA(1,2,3)=2, alpha=0.5 -> 3,4,5,6,7,8,9
        let series: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let value = ema(&series, 3).unwrap();
        assert!((value - 9.0).abs() < 1e-9);

        let all = ema_series(&series, 3);
        assert_eq!(all.len(), 8);
        assert!((all[0] - 2.0).abs() < 1e-9);
        assert!((all[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ema_requires_enough_samples() {
        assert!(ema(&[1.0, 2.0], 3).is_none());
    }

    #[test]
    fn rsi_needs_more_than_period_closes() {
        let closes: Vec<f64> = (0..15).map(|x| x as f64).collect();
        assert!(rsi(&closes, 14).is_some());
        assert!(rsi(&closes[..14], 14).is_none());
    }

    #[test]
    fn rsi_extremes_and_neutral() {
        // Monotonically rising closes -> RSI 100
        let rising: Vec<f64> = (0..20).map(|x| 100.0 + x as f64).collect();
        assert!((rsi(&rising, 14).unwrap() - 100.0).abs() < 1e-9);

        // Monotonically falling -> RSI 0
        let falling: Vec<f64> = (0..20).map(|x| 100.0 - x as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1e-9);

        // Flat -> neutral 50
        let flat = vec![100.0; 20];
        assert!((rsi(&flat, 14).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_is_deterministic() {
        let closes: Vec<f64> = (0..40)
            .map(|x| 100.0 + ((x as f64) * 0.7).sin() * 5.0)
            .collect();
        assert_eq!(rsi(&closes, 14), rsi(&closes, 14));
    }

    #[test]
    fn macd_exposes_growth_history() {
        // Accelerating uptrend: histogram should be positive and growing.
        let closes: Vec<f64> = (0..60).map(|x| 100.0 + (x as f64).powf(1.4)).collect();
        let snap = macd(&closes, 12, 26, 9).unwrap();
        assert!(snap.hist > 0.0);
        assert!(snap.hist > snap.hist_prev);
        assert!(snap.hist_prev > snap.hist_prev2);
        assert!(snap.growing_toward(Direction::Up));
        assert!(!snap.growing_toward(Direction::Down));
    }

    #[test]
    fn macd_needs_history() {
        let closes: Vec<f64> = (0..30).map(|x| x as f64).collect();
        assert!(macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn heiken_ashi_bounds_hold() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.9).sin() * 10.0;
                make_candle(i * 60_000, base, base + 5.0, base - 5.0, base + 2.0)
            })
            .collect();
        let ha = heiken_ashi(&candles);
        assert_eq!(ha.len(), candles.len());
        for c in &ha {
            assert!(c.low <= c.open.min(c.close));
            assert!(c.high >= c.open.max(c.close));
        }
    }

    #[test]
    fn heiken_ashi_first_open_is_mid() {
        let candles = vec![make_candle(0, 100.0, 110.0, 90.0, 104.0)];
        let ha = heiken_ashi(&candles);
        assert!((ha[0].open - 102.0).abs() < 1e-9);
        assert!((ha[0].close - 101.0).abs() < 1e-9);
    }

    #[test]
    fn consecutive_run_counts_trailing_streak() {
        // Three rising candles after one falling one.
        let mut candles = vec![make_candle(0, 105.0, 106.0, 95.0, 96.0)];
        for i in 1..4 {
            let base = 96.0 + i as f64 * 4.0;
            candles.push(make_candle(i * 60_000, base, base + 5.0, base - 1.0, base + 4.0));
        }
        let run = count_consecutive(&heiken_ashi(&candles)).unwrap();
        assert_eq!(run.color, HaColor::Green);
        assert_eq!(run.count, 3);
    }

    #[test]
    fn vwap_weighs_by_volume() {
        let mut c1 = make_candle(0, 100.0, 100.0, 100.0, 100.0);
        let mut c2 = make_candle(60_000, 200.0, 200.0, 200.0, 200.0);
        c1.volume = 3.0;
        c2.volume = 1.0;
        let vwap = session_vwap(&[c1, c2]).unwrap();
        assert!((vwap - 125.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_series_tracks_running_value() {
        let candles: Vec<Candle> = (0..5)
            .map(|i| {
                let p = 100.0 + i as f64;
                make_candle(i * 60_000, p, p, p, p)
            })
            .collect();
        let series = vwap_series(&candles);
        assert_eq!(series.len(), 5);
        assert!((series[0] - 100.0).abs() < 1e-9);
        assert!((series[4] - 102.0).abs() < 1e-9);
    }

    #[test]
    fn slope_last_basic() {
        let series = vec![1.0, 2.0, 4.0, 8.0];
        assert!((slope_last(&series, 2).unwrap() - 3.0).abs() < 1e-9);
        assert!(slope_last(&series, 4).is_none());
        assert!(slope_last(&[1.0], 1).is_none());
    }
}
