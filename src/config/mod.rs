//! Configuration management for strikebot
//!
//! Loads from optional YAML files + environment variables via .env.
//! Every tunable has a default so the engine runs out of the box in
//! paper mode; the documented bare environment names (PORT,
//! PAPER_BALANCE, POLYMARKET_SLUG, ...) are honored on top of the
//! STRIKEBOT__* override prefix.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub feeds: FeedsConfig,
    pub polymarket: PolymarketConfig,
    pub engine: EngineConfig,
    pub strategy: StrategyConfig,
    pub paper: PaperConfig,
    pub persistence: PersistenceConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Dashboard HTTP/WS port
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    /// Spot trade stream endpoint
    pub spot_ws_url: String,
    /// Spot kline REST endpoint (for candle backfill)
    pub spot_rest_url: String,
    /// On-chain RPC endpoint
    pub polygon_rpc_url: String,
    /// On-chain WS endpoint
    pub polygon_wss_url: String,
    /// Chainlink BTC/USD aggregator address
    pub chainlink_btc_usd_aggregator: String,
    /// Fall back to REST when the on-chain stream is silent this long
    pub chainlink_stale_ms: i64,
    /// Reconnect backoff after a dropped WS connection
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    /// Explicit market slug ("" = discover via series)
    pub slug: String,
    pub series_id: String,
    pub series_slug: String,
    /// Pick the latest active market of the series automatically
    pub auto_select_latest: bool,
    pub live_ws_url: String,
    pub gamma_url: String,
    pub clob_url: String,
    /// HTTP deadline for odds/metadata fetches
    pub http_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Fast tick period (UI/PnL refresh)
    pub fast_tick_ms: u64,
    /// Slow pass every N fast ticks (strategy + trader)
    pub slow_every_ticks: u32,
    /// Market metadata re-fetch interval
    pub heavy_fetch_interval_ms: i64,
    /// Strike override file, polled ~5 s
    pub strike_file: String,
    /// Consecutive hard errors before the process exits fatally
    pub max_consecutive_errors: u32,
    /// Candle ring capacity (>= 240 required by the assembler)
    pub candle_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Minimum candles before the evaluator runs
    pub min_candles: usize,
    /// Momentum: required |spot - strike| in dollars
    pub momentum_min_diff_usd: f64,
    /// Momentum: odds must be below 1 - this edge
    pub min_odds_edge: f64,
    /// Momentum: absolute odds ceiling
    pub momentum_max_odds: f64,
    /// Late window: required |spot - strike|
    pub late_min_diff_usd: f64,
    /// Late window: mean candle range ceiling over the last 5 candles
    pub late_max_mean_range_usd: f64,
    /// Late window / sniper odds ceiling
    pub late_max_odds: f64,
    /// Sniper: required |spot - strike|
    pub sniper_min_diff_usd: f64,
    /// Rolling VWAP window in candles (the strategy's "session")
    pub vwap_window: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    /// Starting virtual balance (USDC)
    pub initial_balance: f64,
    /// Hard stop at this ROI percentage (negative)
    pub stop_loss_roi_pct: f64,
    /// Fallback take-profit ROI percentage
    pub take_profit_roi_pct: f64,
    /// Momentum-specific take-profit ROI percentage
    pub momentum_take_profit_roi_pct: f64,
    pub max_concurrent_positions: usize,
    /// Daily loss cap as percent of balance
    pub daily_loss_limit_pct: f64,
    /// Minimum seconds between entries
    pub entry_cooldown_seconds: i64,
    /// No stop-loss inside this many seconds after entry
    pub stop_loss_grace_period_seconds: i64,
    /// Minutes to stand down after a stop-loss
    pub cooldown_minutes: f64,
    pub min_entry_price: f64,
    pub max_entry_price: f64,
    /// Circuit breaker threshold
    pub max_consecutive_losses: u32,
    /// Prices at or below this are treated as nearly-resolved losers
    pub resolution_threshold: f64,
    /// Time guard in minutes (0.5 for late-window positions)
    pub time_guard_minutes: f64,
    pub late_window_time_guard_minutes: f64,
    /// Legacy mean-reversion time stop (minutes left)
    pub mean_reversion_time_stop_min: f64,
    pub use_kelly: bool,
    pub kelly_fraction: f64,
    pub min_kelly_bet: f64,
    pub max_kelly_bet: f64,
    /// Fallback fixed stake when Kelly is off and no per-strategy size applies
    pub min_bet: f64,
    pub use_polymarket_dynamic_fees: bool,
    /// Flat fee percent when dynamic fees are off
    pub fee_pct: f64,
    /// Paper state JSON path
    pub state_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite log path ("" disables the log)
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Discord webhook URL ("" disables notifications)
    pub discord_webhook_url: String,
}

impl AppConfig {
    /// Load configuration from defaults, optional files and environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            // Server
            .set_default("server.port", 8090)?
            // Feeds
            .set_default(
                "feeds.spot_ws_url",
                "wss://stream.binance.com:9443/ws/btcusdt@aggTrade",
            )?
            .set_default("feeds.spot_rest_url", "https://api.binance.com/api/v3/klines")?
            .set_default("feeds.polygon_rpc_url", "https://polygon-rpc.com")?
            .set_default("feeds.polygon_wss_url", "")?
            .set_default(
                "feeds.chainlink_btc_usd_aggregator",
                "0xc907E116054Ad103354f2D350FD2514433D57F6f",
            )?
            .set_default("feeds.chainlink_stale_ms", 10_000)?
            .set_default("feeds.reconnect_delay_ms", 3_000)?
            // Polymarket
            .set_default("polymarket.slug", "")?
            .set_default("polymarket.series_id", "")?
            .set_default("polymarket.series_slug", "bitcoin-up-or-down-15-minute")?
            .set_default("polymarket.auto_select_latest", true)?
            .set_default("polymarket.live_ws_url", "")?
            .set_default("polymarket.gamma_url", "https://gamma-api.polymarket.com")?
            .set_default("polymarket.clob_url", "https://clob.polymarket.com")?
            .set_default("polymarket.http_timeout_ms", 5_000)?
            // Engine
            .set_default("engine.fast_tick_ms", 250)?
            .set_default("engine.slow_every_ticks", 8)?
            .set_default("engine.heavy_fetch_interval_ms", 30_000)?
            .set_default("engine.strike_file", "strike.txt")?
            .set_default("engine.max_consecutive_errors", 10)?
            .set_default("engine.candle_capacity", 360)?
            // Strategy
            .set_default("strategy.min_candles", 30)?
            .set_default("strategy.momentum_min_diff_usd", 50.0)?
            .set_default("strategy.min_odds_edge", 0.10)?
            .set_default("strategy.momentum_max_odds", 0.85)?
            .set_default("strategy.late_min_diff_usd", 300.0)?
            .set_default("strategy.late_max_mean_range_usd", 80.0)?
            .set_default("strategy.late_max_odds", 0.90)?
            .set_default("strategy.sniper_min_diff_usd", 80.0)?
            .set_default("strategy.vwap_window", 60)?
            // Paper trader
            .set_default("paper.initial_balance", 100.0)?
            .set_default("paper.stop_loss_roi_pct", -40.0)?
            .set_default("paper.take_profit_roi_pct", 80.0)?
            .set_default("paper.momentum_take_profit_roi_pct", 50.0)?
            .set_default("paper.max_concurrent_positions", 2)?
            .set_default("paper.daily_loss_limit_pct", 30.0)?
            .set_default("paper.entry_cooldown_seconds", 30)?
            .set_default("paper.stop_loss_grace_period_seconds", 15)?
            .set_default("paper.cooldown_minutes", 5.0)?
            .set_default("paper.min_entry_price", 0.05)?
            .set_default("paper.max_entry_price", 0.95)?
            .set_default("paper.max_consecutive_losses", 3)?
            .set_default("paper.resolution_threshold", 0.05)?
            .set_default("paper.time_guard_minutes", 2.0)?
            .set_default("paper.late_window_time_guard_minutes", 0.5)?
            .set_default("paper.mean_reversion_time_stop_min", 3.0)?
            .set_default("paper.use_kelly", true)?
            .set_default("paper.kelly_fraction", 0.5)?
            .set_default("paper.min_kelly_bet", 3.0)?
            .set_default("paper.max_kelly_bet", 5.0)?
            .set_default("paper.min_bet", 2.0)?
            .set_default("paper.use_polymarket_dynamic_fees", true)?
            .set_default("paper.fee_pct", 1.0)?
            .set_default("paper.state_file", "paper_state.json")?
            // Persistence
            .set_default("persistence.sqlite_path", "strikebot.db")?
            // Notifications
            .set_default("notify.discord_webhook_url", "")?;

        // Documented bare environment names override the defaults.
        for (env, key) in [
            ("PORT", "server.port"),
            ("PAPER_BALANCE", "paper.initial_balance"),
            ("POLYGON_RPC_URL", "feeds.polygon_rpc_url"),
            ("POLYGON_WSS_URL", "feeds.polygon_wss_url"),
            (
                "CHAINLINK_BTC_USD_AGGREGATOR",
                "feeds.chainlink_btc_usd_aggregator",
            ),
            ("POLYMARKET_SLUG", "polymarket.slug"),
            ("POLYMARKET_SERIES_ID", "polymarket.series_id"),
            ("POLYMARKET_SERIES_SLUG", "polymarket.series_slug"),
            (
                "POLYMARKET_AUTO_SELECT_LATEST",
                "polymarket.auto_select_latest",
            ),
            ("POLYMARKET_LIVE_WS_URL", "polymarket.live_ws_url"),
            ("DISCORD_WEBHOOK_URL", "notify.discord_webhook_url"),
        ] {
            if let Ok(value) = std::env::var(env) {
                builder = builder.set_override(key, value)?;
            }
        }

        let config = builder
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("STRIKEBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        Ok(app)
    }

    /// Config digest (without secrets) for startup logging.
    pub fn digest(&self) -> String {
        format!(
            "port={} balance={:.2} slug={:?} kelly={} dynamic_fees={} fast={}ms",
            self.server.port,
            self.paper.initial_balance,
            if self.polymarket.slug.is_empty() {
                "auto"
            } else {
                &self.polymarket.slug
            },
            self.paper.use_kelly,
            self.paper.use_polymarket_dynamic_fees,
            self.engine.fast_tick_ms,
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
