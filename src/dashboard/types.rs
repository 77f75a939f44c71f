//! Dashboard wire types.
//!
//! DTOs for the WebSocket frames the frontend consumes. The payload
//! schema is stable; fields are camelCased on the wire.

use serde::{Deserialize, Serialize};

/// Outbound WS frame: {"type": "state"|"activity", "payload": {...}}
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum WsFrame {
    State(StatePayload),
    Activity(ActivityPayload),
}

/// Full UI state, emitted every fast tick.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub market_name: String,
    pub market_slug: String,
    pub time_left_str: String,
    pub time_left_min: f64,
    pub side: String,
    pub phase: String,
    pub conviction: String,
    pub advice: String,
    pub binance_price: f64,
    pub current_price: Option<f64>,
    pub strike_price: Option<f64>,
    pub gap: Option<f64>,
    pub poly_up: Option<f64>,
    pub poly_down: Option<f64>,
    pub total_equity: f64,
    pub daily_pnl: f64,
    pub paper_balance: f64,
    pub position: Option<PositionView>,
    pub pos_pnl: f64,
    pub ind_heiken: String,
    pub ind_rsi: String,
    pub ind_macd: String,
    pub ind_vwap: String,
    pub ind_ema: String,
    pub recent_trades: Vec<TradeView>,
    pub win_stats: WinStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
    pub side: String,
    pub strategy: String,
    pub entry_price: f64,
    pub amount: f64,
    pub shares: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeView {
    pub ts: i64,
    pub side: String,
    pub strategy: String,
    pub pnl: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WinStats {
    pub today: String,
    pub overall: String,
}

/// Notable-event frame: trade opens/closes, resets, errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}
