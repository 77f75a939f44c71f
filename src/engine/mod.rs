//! Orchestrator loop.
//!
//! Dual cadence: a fast tick (default 250 ms) refreshes prices,
//! unrealized P&L and the dashboard; every Nth fast tick (default 8,
//! i.e. 2 s) runs the slow pass - snapshot assembly, strategy
//! evaluation and the paper-trader update. The orchestrator is the
//! single owner of all mutable domain state; feed tasks only write
//! last-value cells.
//!
//! Transient I/O problems are warnings. Consecutive hard errors in the
//! slow pass escalate to a fatal exit at the configured threshold.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use tokio::sync::mpsc::Receiver;
use tracing::{error, info, warn};

use crate::candles::CandleRing;
use crate::config::AppConfig;
use crate::feeds::polymarket::PolymarketClient;
use crate::feeds::PriceCell;
use crate::market::StrikeTracker;
use crate::notifier::DiscordNotifier;
use crate::paper::{CloseEvent, PaperTrader, StateStore, TickContext};
use crate::persistence::{SignalRow, SqliteLog, TradeRow};
use crate::snapshot;
use crate::strategy;
use crate::types::{Action, Market, PriceTick, Recommendation, SideOdds, Snapshot};

#[cfg(feature = "dashboard")]
use crate::dashboard::{DashboardHub, PositionView, StatePayload, TradeView, WinStats};
#[cfg(feature = "dashboard")]
use crate::types::TradeResult;

const RECENT_TRADES_SHOWN: usize = 20;

/// Slow-pass results cached for the fast tick's UI refresh.
#[derive(Default)]
struct UiCache {
    market_name: String,
    market_slug: String,
    time_left_min: f64,
    strike: Option<f64>,
    side: String,
    phase: String,
    conviction: String,
    advice: String,
    ind_heiken: String,
    ind_rsi: String,
    ind_macd: String,
    ind_vwap: String,
    ind_ema: String,
}

pub struct Engine {
    cfg: AppConfig,
    spot_cell: Arc<PriceCell>,
    chain_cell: Arc<PriceCell>,
    tick_rx: Receiver<PriceTick>,
    candles: CandleRing,
    strikes: StrikeTracker,
    trader: PaperTrader,
    client: PolymarketClient,
    log: SqliteLog,
    notifier: DiscordNotifier,
    #[cfg(feature = "dashboard")]
    hub: Option<DashboardHub>,
    cached_market: Option<Market>,
    last_market_fetch: i64,
    last_odds: SideOdds,
    recent_closes: VecDeque<CloseEvent>,
    ui: UiCache,
    consecutive_errors: u32,
}

impl Engine {
    pub fn new(
        cfg: AppConfig,
        spot_cell: Arc<PriceCell>,
        chain_cell: Arc<PriceCell>,
        tick_rx: Receiver<PriceTick>,
    ) -> Result<Self> {
        let client = PolymarketClient::new(&cfg.polymarket)?;
        let trader = PaperTrader::new(
            cfg.paper.clone(),
            StateStore::new(&cfg.paper.state_file),
        );
        let log = SqliteLog::spawn(
            &cfg.persistence.sqlite_path,
            !cfg.persistence.sqlite_path.is_empty(),
        );
        let notifier = DiscordNotifier::new(&cfg.notify.discord_webhook_url);
        Ok(Self {
            candles: CandleRing::new(cfg.engine.candle_capacity),
            strikes: StrikeTracker::new(&cfg.engine.strike_file),
            trader,
            client,
            log,
            notifier,
            #[cfg(feature = "dashboard")]
            hub: None,
            cached_market: None,
            last_market_fetch: 0,
            last_odds: SideOdds::default(),
            recent_closes: VecDeque::new(),
            ui: UiCache::default(),
            consecutive_errors: 0,
            cfg,
            spot_cell,
            chain_cell,
            tick_rx,
        })
    }

    #[cfg(feature = "dashboard")]
    pub fn with_hub(mut self, hub: DashboardHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Backfill the candle ring from REST history.
    pub async fn seed_candles(&mut self) {
        match crate::feeds::binance::fetch_recent_candles(
            &self.cfg.feeds.spot_rest_url,
            "BTCUSDT",
            snapshot::CANDLE_WINDOW,
        )
        .await
        {
            Ok(candles) => self.candles.seed(candles),
            Err(e) => warn!(error = %e, "Candle backfill failed, warming up from live ticks"),
        }
    }

    /// Run until a fatal error. Cancellation comes from the caller
    /// (signal handling lives in main).
    pub async fn run(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(Duration::from_millis(self.cfg.engine.fast_tick_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let slow_every = self.cfg.engine.slow_every_ticks.max(1) as u64;
        let mut tick_count: u64 = 0;

        loop {
            interval.tick().await;
            tick_count += 1;
            self.drain_price_ticks();

            if tick_count % slow_every == 0 {
                match self.slow_pass().await {
                    Ok(()) => self.consecutive_errors = 0,
                    Err(e) => {
                        self.consecutive_errors += 1;
                        error!(
                            error = %e,
                            consecutive = self.consecutive_errors,
                            "Slow pass failed"
                        );
                        #[cfg(feature = "dashboard")]
                        if let Some(hub) = &self.hub {
                            hub.publish_activity(format!("Engine error: {e}"), "error");
                        }
                        if self.consecutive_errors >= self.cfg.engine.max_consecutive_errors {
                            bail!("{} consecutive engine errors, giving up", self.consecutive_errors);
                        }
                    }
                }
            }

            self.fast_tick().await;
        }
    }

    /// Persist trader state (called by main on shutdown).
    pub fn save_state(&self) {
        self.trader.save();
    }

    /// Move pending feed ticks into the candle ring.
    fn drain_price_ticks(&mut self) {
        while let Ok(tick) = self.tick_rx.try_recv() {
            self.candles.on_tick(tick.ts, tick.price);
        }
    }

    // ── Slow pass: snapshot -> strategy -> trader ───────────────

    async fn slow_pass(&mut self) -> Result<()> {
        let now = Utc::now().timestamp_millis();

        self.refresh_market(now).await;
        let market = self.cached_market.clone();

        let odds = match &market {
            Some(m) => self.client.fetch_odds(m).await,
            None => SideOdds::default(),
        };
        self.last_odds = odds;

        let Some(spot) = self.spot_cell.price() else {
            // Feed warm-up or outage; nothing to decide on.
            warn!("No spot price yet, skipping strategy pass");
            return Ok(());
        };
        let chainlink = self.chain_cell.price();

        let strike = market
            .as_ref()
            .and_then(|m| self.strikes.strike_for(m, chainlink, now));

        let snap = snapshot::assemble(
            now,
            spot,
            chainlink,
            market.clone(),
            strike,
            odds,
            self.candles.last_n(snapshot::CANDLE_WINDOW),
            self.cfg.strategy.vwap_window,
        );

        let rec = strategy::evaluate(&snap, &self.cfg.strategy);
        self.log.push_signal(signal_row(&snap, &rec, spot));

        let report = self.trader.update(TickContext {
            now_ms: now,
            rec: &rec,
            odds,
            market: market.as_ref(),
            trend: snap.trend,
            time_left_min: snap.time_left_min,
            resolution_price: chainlink.or(Some(spot)),
            strike,
        });

        for closed in &report.closed {
            self.log.push_trade(TradeRow::from_close(closed));
            self.notifier.notify_close(closed);
            #[cfg(feature = "dashboard")]
            if let Some(hub) = &self.hub {
                hub.publish_activity(
                    format!(
                        "Closed {} {} [{}] pnl {:+.2}",
                        closed.side, closed.strategy, closed.reason, closed.pnl
                    ),
                    "trade",
                );
            }
            self.recent_closes.push_back(closed.clone());
            while self.recent_closes.len() > RECENT_TRADES_SHOWN {
                self.recent_closes.pop_front();
            }
        }
        if let Some(opened) = &report.opened {
            self.log.push_trade(TradeRow::from_open(opened));
            self.notifier.notify_open(opened);
            #[cfg(feature = "dashboard")]
            if let Some(hub) = &self.hub {
                hub.publish_activity(
                    format!(
                        "Opened {} {} @ {:.2} ({})",
                        opened.side, opened.strategy, opened.price, opened.reason
                    ),
                    "trade",
                );
            }
        }
        #[cfg(feature = "dashboard")]
        if report.daily_reset {
            if let Some(hub) = &self.hub {
                hub.publish_activity("Daily risk counters reset", "info");
            }
        }
        #[cfg(feature = "dashboard")]
        if let Some(reason) = &report.blocked {
            if let Some(hub) = &self.hub {
                hub.publish_activity(format!("Entry blocked: {reason}"), "info");
            }
        }

        self.update_ui_cache(&snap, &rec);
        Ok(())
    }

    /// Re-fetch market metadata when the cache is cold, stale or the
    /// cached window already settled.
    async fn refresh_market(&mut self, now: i64) {
        let expired = self
            .cached_market
            .as_ref()
            .map(|m| m.end_date_ms <= now)
            .unwrap_or(true);
        if !expired && now - self.last_market_fetch < self.cfg.engine.heavy_fetch_interval_ms {
            return;
        }
        match self.client.fetch_market().await {
            Ok(Some(market)) => {
                if self
                    .cached_market
                    .as_ref()
                    .map(|m| m.slug != market.slug)
                    .unwrap_or(true)
                {
                    info!(slug = %market.slug, question = %market.question, "Tracking market");
                }
                self.cached_market = Some(market);
                self.last_market_fetch = now;
            }
            Ok(None) => {
                self.last_market_fetch = now;
            }
            Err(e) => {
                // Transient; decisions continue against the cached window
                // until it expires.
                warn!(error = %e, "Market metadata fetch failed");
            }
        }
    }

    fn update_ui_cache(&mut self, snap: &Snapshot, rec: &Recommendation) {
        let ind = &snap.indicators;
        self.ui = UiCache {
            market_name: snap
                .market
                .as_ref()
                .map(|m| m.question.clone())
                .unwrap_or_default(),
            market_slug: snap
                .market
                .as_ref()
                .map(|m| m.slug.clone())
                .unwrap_or_default(),
            time_left_min: snap.time_left_min,
            strike: snap.strike,
            side: rec
                .side
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into()),
            phase: rec
                .strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "SCAN".into()),
            conviction: rec.confidence.to_string(),
            advice: match rec.action {
                Action::Enter => format!("ENTER ({})", rec.reason),
                Action::NoTrade => format!("NO TRADE ({})", rec.reason),
            },
            ind_heiken: ind
                .ha_run
                .map(|r| {
                    format!(
                        "{}x{}",
                        match r.color {
                            crate::indicators::HaColor::Green => "GREEN",
                            crate::indicators::HaColor::Red => "RED",
                        },
                        r.count
                    )
                })
                .unwrap_or_else(|| "-".into()),
            ind_rsi: ind
                .rsi
                .map(|v| format!("{v:.1}"))
                .unwrap_or_else(|| "-".into()),
            ind_macd: ind
                .macd
                .map(|m| format!("{:+.2} (d {:+.2})", m.hist, m.hist_delta()))
                .unwrap_or_else(|| "-".into()),
            ind_vwap: ind
                .vwap
                .map(|v| format!("{v:.0}"))
                .unwrap_or_else(|| "-".into()),
            ind_ema: match (ind.ema9, ind.ema21) {
                (Some(e9), Some(e21)) => format!("{e9:.0}/{e21:.0}"),
                _ => "-".into(),
            },
        };
    }

    // ── Fast tick: prices + dashboard only ──────────────────────

    async fn fast_tick(&mut self) {
        #[cfg(feature = "dashboard")]
        {
            let Some(hub) = self.hub.clone() else {
                return;
            };
            let payload = self.build_state_payload();
            hub.publish_state(payload).await;
        }
    }

    #[cfg(feature = "dashboard")]
    fn build_state_payload(&self) -> StatePayload {
        let spot = self.spot_cell.price().unwrap_or(0.0);
        let chainlink = self.chain_cell.price();
        let state = self.trader.state();
        let slug = &self.ui.market_slug;

        let pos_pnl = self.trader.unrealized_pnl(slug, &self.last_odds);
        let position = state.positions.first().map(|p| PositionView {
            side: p.side.to_string(),
            strategy: p.strategy.to_string(),
            entry_price: p.entry_price,
            amount: p.amount,
            shares: p.shares,
        });

        let wins_today = self
            .recent_closes
            .iter()
            .filter(|c| c.result == TradeResult::Win)
            .count();
        let overall_wins = state.recent_wins();

        StatePayload {
            market_name: self.ui.market_name.clone(),
            market_slug: slug.clone(),
            time_left_str: format_minutes(self.ui.time_left_min),
            time_left_min: self.ui.time_left_min,
            side: self.ui.side.clone(),
            phase: self.ui.phase.clone(),
            conviction: self.ui.conviction.clone(),
            advice: self.ui.advice.clone(),
            binance_price: spot,
            current_price: chainlink,
            strike_price: self.ui.strike,
            gap: self.ui.strike.map(|k| spot - k),
            poly_up: self.last_odds.up,
            poly_down: self.last_odds.down,
            total_equity: self.trader.equity(slug, &self.last_odds),
            daily_pnl: -state.daily_loss,
            paper_balance: state.balance,
            position,
            pos_pnl,
            ind_heiken: self.ui.ind_heiken.clone(),
            ind_rsi: self.ui.ind_rsi.clone(),
            ind_macd: self.ui.ind_macd.clone(),
            ind_vwap: self.ui.ind_vwap.clone(),
            ind_ema: self.ui.ind_ema.clone(),
            recent_trades: self
                .recent_closes
                .iter()
                .rev()
                .map(|c| TradeView {
                    ts: c.ts_ms,
                    side: c.side.to_string(),
                    strategy: c.strategy.to_string(),
                    pnl: c.pnl,
                    reason: c.reason.clone(),
                })
                .collect(),
            win_stats: WinStats {
                today: format!("{}/{}", wins_today, self.recent_closes.len()),
                overall: format!("{}/{}", overall_wins, state.recent_results.len()),
            },
        }
    }
}

/// "MM:SS" for the dashboard countdown.
fn format_minutes(minutes: f64) -> String {
    if minutes <= 0.0 {
        return "00:00".into();
    }
    let total_secs = (minutes * 60.0) as i64;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

fn signal_row(snap: &Snapshot, rec: &Recommendation, spot: f64) -> SignalRow {
    // Model probabilities for both sides, derived once from the UP score.
    let raw = strategy::probability::raw_up_score(snap);
    let up = strategy::probability::adjusted_up(raw, snap.spot, snap.strike, snap.time_left_min);
    let (edge_up, edge_down) = (
        snap.odds.up.map(|o| up - o),
        snap.odds.down.map(|o| (1.0 - up) - o),
    );

    let recommendation = match rec.action {
        Action::Enter => format!(
            "ENTER {} {}",
            rec.side.map(|s| s.to_string()).unwrap_or_default(),
            rec.strategy.map(|s| s.to_string()).unwrap_or_default()
        ),
        Action::NoTrade => "NO_TRADE".into(),
    };

    SignalRow {
        timestamp: snap.ts_ms,
        time_left_min: snap.time_left_min,
        regime: snap.trend.to_string(),
        signal: rec.reason.clone(),
        model_up: Some(up),
        model_down: Some(1.0 - up),
        market_up: snap.odds.up,
        market_down: snap.odds.down,
        edge_up,
        edge_down,
        recommendation,
        strike: snap.strike,
        current_price: snap.chainlink,
        binance_price: spot,
        gap: snap.diff(),
    }
}
