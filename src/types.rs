//! Core types used throughout strikebot
//!
//! Defines the shared data structures for candles, markets, odds,
//! snapshots and strategy recommendations.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::IndicatorBundle;

/// Trading direction / market side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Outcome index in Polymarket metadata arrays (UP first)
    pub fn outcome_index(&self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
        }
    }

    pub fn as_lower(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Spot trend relative to EMA21
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Falling,
}

impl Trend {
    /// Whether this trend favors the given side
    pub fn favors(&self, side: Direction) -> bool {
        matches!(
            (self, side),
            (Trend::Rising, Direction::Up) | (Trend::Falling, Direction::Down)
        )
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Rising => write!(f, "RISING"),
            Trend::Falling => write!(f, "FALLING"),
        }
    }
}

/// One-minute OHLCV candle
///
/// `open_time` is unix-ms aligned to a minute boundary. Within a stream,
/// open times are strictly increasing by 60_000. A candle is mutable only
/// while its minute is forming; once the boundary elapses it is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (start of the minute, unix-ms)
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Close time of this candle (= open time of the next one)
    pub fn close_time(&self) -> i64 {
        self.open_time + 60_000
    }

    /// High-low range in dollars
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Normalized price tick from a spot or on-chain feed
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceTick {
    /// Timestamp in unix-ms (exchange time)
    pub ts: i64,
    pub price: f64,
}

/// A Polymarket-style 15-minute binary market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Market slug (human-readable ID)
    pub slug: String,
    /// Question/title, usually containing the strike ("price to beat")
    pub question: String,
    /// Outcome labels, UP first
    pub outcomes: Vec<String>,
    /// CLOB token IDs, aligned with `outcomes`
    pub clob_token_ids: Vec<String>,
    /// Settlement instant (unix-ms); overrides the clock-derived window end
    pub end_date_ms: i64,
    /// Raw metadata fields kept for strike extraction
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Market {
    /// Token ID for the given side, if present
    pub fn token_for(&self, side: Direction) -> Option<&str> {
        self.clob_token_ids
            .get(side.outcome_index())
            .map(|s| s.as_str())
    }

    /// Start of the 15-minute window this market settles (unix-ms)
    pub fn window_start_ms(&self) -> i64 {
        self.end_date_ms - crate::market::clock::WINDOW_MS
    }
}

/// Per-side best buy prices in (0, 1), None when the book is empty
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SideOdds {
    pub up: Option<f64>,
    pub down: Option<f64>,
}

impl SideOdds {
    pub fn side(&self, side: Direction) -> Option<f64> {
        match side {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    /// Both sides present and strictly inside (0, 1)
    pub fn is_complete(&self) -> bool {
        [self.up, self.down]
            .iter()
            .all(|o| matches!(o, Some(p) if *p > 0.0 && *p < 1.0))
    }
}

/// Unified view of the world at one instant, built once per slow tick
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub ts_ms: i64,
    /// Latest spot price from the exchange feed
    pub spot: f64,
    /// Latest on-chain (chainlink) price, if the feed has reported
    pub chainlink: Option<f64>,
    pub market: Option<Market>,
    pub strike: Option<f64>,
    pub odds: SideOdds,
    /// Closed one-minute candles, oldest first
    pub candles: Vec<Candle>,
    pub indicators: IndicatorBundle,
    /// Minutes until settlement
    pub time_left_min: f64,
    pub trend: Trend,
}

impl Snapshot {
    /// Spot distance from strike in dollars (positive = above)
    pub fn diff(&self) -> Option<f64> {
        self.strike.map(|k| self.spot - k)
    }
}

/// Strategy family that produced a recommendation or opened a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyTag {
    Sniper,
    Momentum,
    LateWindow,
    /// Legacy strategy, no longer dispatched; kept so positions opened
    /// under it (or restored from older state files) settle correctly.
    MeanReversion,
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyTag::Sniper => write!(f, "SNIPER"),
            StrategyTag::Momentum => write!(f, "MOMENTUM"),
            StrategyTag::LateWindow => write!(f, "LATE_WINDOW"),
            StrategyTag::MeanReversion => write!(f, "MEAN_REVERSION"),
        }
    }
}

/// Conviction level attached to a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    None,
    Medium,
    High,
    VeryHigh,
    Max,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::None => write!(f, "NONE"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::High => write!(f, "HIGH"),
            Confidence::VeryHigh => write!(f, "VERY_HIGH"),
            Confidence::Max => write!(f, "MAX"),
        }
    }
}

/// Evaluator output action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Enter,
    NoTrade,
}

/// The strategy evaluator's verdict for one slow tick
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub action: Action,
    pub side: Option<Direction>,
    pub strategy: Option<StrategyTag>,
    pub confidence: Confidence,
    /// Human-readable diagnostic, always populated
    pub reason: String,
    /// Model probability of the chosen side winning
    pub probability: Option<f64>,
    /// Model probability minus market odds on the chosen side, clamped >= 0
    pub edge: Option<f64>,
}

impl Recommendation {
    pub fn no_trade(reason: impl Into<String>) -> Self {
        Self {
            action: Action::NoTrade,
            side: None,
            strategy: None,
            confidence: Confidence::None,
            reason: reason.into(),
            probability: None,
            edge: None,
        }
    }

    pub fn enter(
        side: Direction,
        strategy: StrategyTag,
        confidence: Confidence,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: Action::Enter,
            side: Some(side),
            strategy: Some(strategy),
            confidence,
            reason: reason.into(),
            probability: None,
            edge: None,
        }
    }
}

/// Outcome of a closed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    Win,
    Loss,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeResult::Win => write!(f, "WIN"),
            TradeResult::Loss => write!(f, "LOSS"),
        }
    }
}

/// UTC calendar date of a unix-ms timestamp, as "YYYY-MM-DD"
pub fn utc_date_string(ts_ms: i64) -> String {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
