//! Paper-trader state persistence.
//!
//! One JSON file holds the whole `PaperState`. A missing or unreadable
//! file yields fresh defaults; saves go through a temp file + rename so
//! a crash mid-write never corrupts the state. Save failures are
//! warnings - the trader continues in memory.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{Direction, StrategyTag, TradeResult};

/// An open paper position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub market_slug: String,
    pub side: Direction,
    /// Share price paid, strictly inside (0, 1) at open
    pub entry_price: f64,
    /// Total cost: stake + entry fee
    pub amount: f64,
    /// stake / entry_price
    pub shares: f64,
    /// Entry timestamp (unix-ms)
    pub entry_time: i64,
    pub strategy: StrategyTag,
    pub strike_price: f64,
    /// Settlement instant of the market this position rides
    pub end_date: i64,
    /// Carried for state-file compatibility; no exit rule reads it
    #[serde(default)]
    pub hit_breakeven_trigger: bool,
}

impl Position {
    /// ROI of selling `shares` at `price` net of `exit_fee`, relative
    /// to the total amount paid.
    pub fn roi_at(&self, price: f64, exit_fee: f64) -> f64 {
        if self.amount <= 0.0 {
            return 0.0;
        }
        (self.shares * price - exit_fee - self.amount) / self.amount
    }
}

/// Everything the paper trader persists across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperState {
    pub balance: f64,
    pub positions: Vec<Position>,
    /// Net cumulative negative P&L for the UTC day (wins subtract)
    pub daily_loss: f64,
    pub last_stop_loss_time: i64,
    /// Ring of the last 10 WIN/LOSS outcomes
    pub recent_results: VecDeque<TradeResult>,
    /// UTC date ("YYYY-MM-DD") of the last daily reset
    pub last_daily_reset: String,
    pub last_exit_time: i64,
    pub last_entry_time: i64,
    pub consecutive_losses: u32,
}

impl PaperState {
    pub fn fresh(balance: f64) -> Self {
        Self {
            balance,
            positions: Vec::new(),
            daily_loss: 0.0,
            last_stop_loss_time: 0,
            recent_results: VecDeque::new(),
            last_daily_reset: String::new(),
            last_exit_time: 0,
            last_entry_time: 0,
            consecutive_losses: 0,
        }
    }

    /// Open positions on one market slug.
    pub fn positions_on<'a>(&'a self, slug: &'a str) -> impl Iterator<Item = &'a Position> {
        self.positions.iter().filter(move |p| p.market_slug == slug)
    }

    /// Wins among the recent-results ring.
    pub fn recent_wins(&self) -> usize {
        self.recent_results
            .iter()
            .filter(|r| matches!(r, TradeResult::Win))
            .count()
    }
}

/// File-backed store for `PaperState`.
pub struct StateStore {
    path: Option<PathBuf>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// In-memory only (tests, dry runs).
    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    /// Load persisted state, falling back to fresh defaults.
    pub fn load(&self, initial_balance: f64) -> PaperState {
        let Some(path) = &self.path else {
            return PaperState::fresh(initial_balance);
        };
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<PaperState>(&json) {
                Ok(state) => {
                    info!(
                        path = %path.display(),
                        balance = state.balance,
                        positions = state.positions.len(),
                        "Paper state loaded"
                    );
                    state
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt paper state, starting fresh");
                    PaperState::fresh(initial_balance)
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No paper state file, starting fresh");
                PaperState::fresh(initial_balance)
            }
        }
    }

    /// Atomically persist the full state (write temp + rename).
    pub fn save(&self, state: &PaperState) {
        let Some(path) = &self.path else {
            return;
        };
        let result = (|| -> anyhow::Result<()> {
            let json = serde_json::to_string_pretty(state)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to save paper state, continuing in memory");
        }
    }
}
