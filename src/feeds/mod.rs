//! Feed adapters and the last-value slots they write into.
//!
//! Each adapter is a long-lived producer task that never blocks the
//! orchestrator: it parses wire messages and stores the freshest value
//! in a mutex-guarded single-slot cell. The consumer only ever reads
//! the latest tick.

pub mod binance;
pub mod chainlink;
pub mod polymarket;

use std::sync::Mutex;

use crate::types::PriceTick;

/// Mutex-protected single-slot cell holding the freshest price.
#[derive(Debug, Default)]
pub struct PriceCell {
    slot: Mutex<Option<PriceTick>>,
}

impl PriceCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, ts: i64, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            return;
        }
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(PriceTick { ts, price });
    }

    pub fn load(&self) -> Option<PriceTick> {
        *self.slot.lock().unwrap()
    }

    /// Latest price regardless of age.
    pub fn price(&self) -> Option<f64> {
        self.load().map(|t| t.price)
    }

    /// True when no tick has arrived within `max_age_ms` of `now_ms`.
    pub fn is_stale(&self, now_ms: i64, max_age_ms: i64) -> bool {
        match self.load() {
            Some(tick) => now_ms - tick.ts > max_age_ms,
            None => true,
        }
    }
}
