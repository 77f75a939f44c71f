//! SQLite signal/trade log.
//!
//! A dedicated writer thread owns the connection; the engine hands rows
//! over an mpsc channel and never blocks on the database. Any insert
//! error (including SQLITE_BUSY) downgrades to a warning and the row is
//! dropped - the log is an observability surface, not a ledger.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use rusqlite::{params, Connection};
use tracing::warn;

use crate::paper::{CloseEvent, OpenEvent};

/// One row per slow tick: what the evaluator saw and said.
#[derive(Debug, Clone)]
pub struct SignalRow {
    pub timestamp: i64,
    pub time_left_min: f64,
    pub regime: String,
    pub signal: String,
    pub model_up: Option<f64>,
    pub model_down: Option<f64>,
    pub market_up: Option<f64>,
    pub market_down: Option<f64>,
    pub edge_up: Option<f64>,
    pub edge_down: Option<f64>,
    pub recommendation: String,
    pub strike: Option<f64>,
    pub current_price: Option<f64>,
    pub binance_price: f64,
    pub gap: Option<f64>,
}

/// One row per open/close action.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub timestamp: i64,
    pub action: String,
    pub side: String,
    pub price: f64,
    pub amount: f64,
    pub shares: f64,
    pub pnl: Option<f64>,
    pub balance: f64,
    pub market_slug: String,
    pub fee: f64,
}

impl TradeRow {
    pub fn from_open(event: &OpenEvent) -> Self {
        Self {
            timestamp: event.ts_ms,
            action: "OPEN".into(),
            side: event.side.to_string(),
            price: event.price,
            amount: event.stake + event.fee,
            shares: event.shares,
            pnl: None,
            balance: event.balance_after,
            market_slug: event.market_slug.clone(),
            fee: event.fee,
        }
    }

    pub fn from_close(event: &CloseEvent) -> Self {
        Self {
            timestamp: event.ts_ms,
            action: format!("CLOSE_{}", event.reason),
            side: event.side.to_string(),
            price: event.exit_price,
            amount: event.amount,
            shares: event.shares,
            pnl: Some(event.pnl),
            balance: event.balance_after,
            market_slug: event.market_slug.clone(),
            fee: event.fee,
        }
    }
}

#[derive(Debug)]
enum LogMsg {
    Signal(SignalRow),
    Trade(TradeRow),
}

/// Handle to the writer thread. Cloneable and cheap; a disabled writer
/// (empty path) swallows rows silently.
#[derive(Clone, Default)]
pub struct SqliteLog {
    tx: Option<mpsc::Sender<LogMsg>>,
}

impl SqliteLog {
    pub fn spawn(path: impl Into<PathBuf>, enabled: bool) -> Self {
        if !enabled {
            return Self { tx: None };
        }
        let path = path.into();
        let (tx, rx) = mpsc::channel::<LogMsg>();
        thread::spawn(move || {
            if let Err(err) = run_writer(path, rx) {
                warn!(error = %err, "sqlite log writer exited");
            }
        });
        Self { tx: Some(tx) }
    }

    pub fn push_signal(&self, row: SignalRow) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(LogMsg::Signal(row));
        }
    }

    pub fn push_trade(&self, row: TradeRow) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(LogMsg::Trade(row));
        }
    }
}

fn run_writer(path: PathBuf, rx: mpsc::Receiver<LogMsg>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_millis(250))?;
    init_schema(&conn)?;

    while let Ok(msg) = rx.recv() {
        let result = match &msg {
            LogMsg::Signal(row) => insert_signal(&conn, row),
            LogMsg::Trade(row) => insert_trade(&conn, row),
        };
        // Busy/full databases are a warning; the row is dropped.
        if let Err(err) = result {
            warn!(error = %err, "sqlite insert failed, row dropped");
        }
    }
    Ok(())
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS signals (
            timestamp      INTEGER NOT NULL,
            time_left_min  REAL NOT NULL,
            regime         TEXT NOT NULL,
            signal         TEXT NOT NULL,
            model_up       REAL,
            model_down     REAL,
            market_up      REAL,
            market_down    REAL,
            edge_up        REAL,
            edge_down      REAL,
            recommendation TEXT NOT NULL,
            strike         REAL,
            current_price  REAL,
            binance_price  REAL NOT NULL,
            gap            REAL
        );
        CREATE TABLE IF NOT EXISTS paper_trades (
            timestamp   INTEGER NOT NULL,
            action      TEXT NOT NULL,
            side        TEXT NOT NULL,
            price       REAL NOT NULL,
            amount      REAL NOT NULL,
            shares      REAL NOT NULL,
            pnl         REAL,
            balance     REAL NOT NULL,
            market_slug TEXT NOT NULL,
            fee         REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_signals_ts ON signals(timestamp);
        CREATE INDEX IF NOT EXISTS idx_trades_ts ON paper_trades(timestamp);",
    )?;
    Ok(())
}

fn insert_signal(conn: &Connection, row: &SignalRow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO signals (timestamp, time_left_min, regime, signal, model_up, model_down,
            market_up, market_down, edge_up, edge_down, recommendation, strike, current_price,
            binance_price, gap)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            row.timestamp,
            row.time_left_min,
            row.regime,
            row.signal,
            row.model_up,
            row.model_down,
            row.market_up,
            row.market_down,
            row.edge_up,
            row.edge_down,
            row.recommendation,
            row.strike,
            row.current_price,
            row.binance_price,
            row.gap,
        ],
    )?;
    Ok(())
}

fn insert_trade(conn: &Connection, row: &TradeRow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO paper_trades (timestamp, action, side, price, amount, shares, pnl,
            balance, market_slug, fee)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            row.timestamp,
            row.action,
            row.side,
            row.price,
            row.amount,
            row.shares,
            row.pnl,
            row.balance,
            row.market_slug,
            row.fee,
        ],
    )?;
    Ok(())
}
