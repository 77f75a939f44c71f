//! Candle aggregation - folds a (timestamp, price) tick stream into
//! one-minute OHLC candles.
//!
//! Minute bucketing is `floor(ts / 60_000)`. On a bucket transition the
//! prior candle is closed (immutable from then on) and a new forming
//! candle starts at the tick price. Trade streams carry no usable size,
//! so every bucket gets a fixed unit volume; richer feeds can replace
//! this when available.

use std::collections::VecDeque;

use crate::types::Candle;

const MINUTE_MS: i64 = 60_000;

/// Fixed per-bucket volume stand-in for trade-by-trade streams.
const UNIT_VOLUME: f64 = 1.0;

/// Bounded ring of closed one-minute candles plus the forming one.
pub struct CandleRing {
    closed: VecDeque<Candle>,
    forming: Option<Candle>,
    capacity: usize,
}

impl CandleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            closed: VecDeque::with_capacity(capacity),
            forming: None,
            capacity,
        }
    }

    /// Feed one tick. Returns the candle that closed, if this tick
    /// crossed a minute boundary.
    pub fn on_tick(&mut self, ts_ms: i64, price: f64) -> Option<Candle> {
        let bucket_open = (ts_ms / MINUTE_MS) * MINUTE_MS;

        let completed = match self.forming.as_mut() {
            Some(candle) if candle.open_time == bucket_open => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
                None
            }
            Some(candle) if candle.open_time < bucket_open => {
                let done = candle.clone();
                self.forming = Some(Self::fresh(bucket_open, price));
                Some(done)
            }
            // Out-of-order tick from before the forming bucket: drop it.
            Some(_) => None,
            None => {
                self.forming = Some(Self::fresh(bucket_open, price));
                None
            }
        };

        if let Some(ref candle) = completed {
            self.push_closed(candle.clone());
        }
        completed
    }

    fn fresh(open_time: i64, price: f64) -> Candle {
        Candle {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: UNIT_VOLUME,
        }
    }

    fn push_closed(&mut self, candle: Candle) {
        // Ignore candles that would break monotonic open times
        // (duplicate seeds, replayed history).
        if let Some(last) = self.closed.back() {
            if candle.open_time <= last.open_time {
                return;
            }
        }
        self.closed.push_back(candle);
        while self.closed.len() > self.capacity {
            self.closed.pop_front();
        }
    }

    /// The currently forming (mutable) candle, if any.
    pub fn forming(&self) -> Option<&Candle> {
        self.forming.as_ref()
    }

    /// All closed candles, oldest first.
    pub fn closed(&self) -> impl Iterator<Item = &Candle> {
        self.closed.iter()
    }

    pub fn closed_len(&self) -> usize {
        self.closed.len()
    }

    /// Last `n` closed candles in chronological order.
    pub fn last_n(&self, n: usize) -> Vec<Candle> {
        let skip = self.closed.len().saturating_sub(n);
        self.closed.iter().skip(skip).cloned().collect()
    }

    /// Seed the ring with historical candles (e.g. a REST backfill).
    /// Candles older than the newest already-closed one are ignored.
    pub fn seed(&mut self, candles: Vec<Candle>) {
        for candle in candles {
            self.push_closed(candle);
        }
    }
}

impl Default for CandleRing {
    fn default() -> Self {
        Self::new(360)
    }
}
