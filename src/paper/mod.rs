//! Paper trading engine.
//!
//! Owns the position lifecycle: expiry settlement, exit policy, entry
//! gating, risk caps, fees and bookkeeping. One `update` per slow tick
//! runs the full pass in a fixed order - daily reset, settlement, exits,
//! then entries - so a same-tick flip first liquidates and then
//! re-opens. The fast tick only reads (`unrealized_pnl`, `equity`).

pub mod fees;
pub mod kelly;
pub mod state;

pub use state::{PaperState, Position, StateStore};

use tracing::{info, warn};

use crate::config::PaperConfig;
use crate::types::{
    utc_date_string, Action, Direction, Market, Recommendation, SideOdds, StrategyTag, Trend,
    TradeResult,
};

const RECENT_RESULTS_CAP: usize = 10;

/// A position opened this tick.
#[derive(Debug, Clone)]
pub struct OpenEvent {
    pub ts_ms: i64,
    pub market_slug: String,
    pub side: Direction,
    pub strategy: StrategyTag,
    pub price: f64,
    pub stake: f64,
    pub fee: f64,
    pub shares: f64,
    pub balance_after: f64,
    pub reason: String,
}

/// A position closed this tick (exit or settlement).
#[derive(Debug, Clone)]
pub struct CloseEvent {
    pub ts_ms: i64,
    pub market_slug: String,
    pub side: Direction,
    pub strategy: StrategyTag,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    pub amount: f64,
    pub fee: f64,
    pub pnl: f64,
    pub reason: String,
    pub result: TradeResult,
    pub balance_after: f64,
}

/// Everything that happened during one `update`.
#[derive(Debug, Default)]
pub struct TickReport {
    pub opened: Option<OpenEvent>,
    pub closed: Vec<CloseEvent>,
    /// First failing entry gate, when an ENTER was blocked
    pub blocked: Option<String>,
    pub daily_reset: bool,
}

/// Inputs for one trader pass.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub now_ms: i64,
    pub rec: &'a Recommendation,
    pub odds: SideOdds,
    pub market: Option<&'a Market>,
    pub trend: Trend,
    pub time_left_min: f64,
    /// Resolution-source price (chainlink preferred, spot fallback)
    pub resolution_price: Option<f64>,
    pub strike: Option<f64>,
}

pub struct PaperTrader {
    cfg: PaperConfig,
    state: PaperState,
    store: StateStore,
}

impl PaperTrader {
    pub fn new(cfg: PaperConfig, store: StateStore) -> Self {
        let state = store.load(cfg.initial_balance);
        Self { cfg, state, store }
    }

    pub fn state(&self) -> &PaperState {
        &self.state
    }

    pub fn balance(&self) -> f64 {
        self.state.balance
    }

    /// Persist current state (also called on shutdown).
    pub fn save(&self) {
        self.store.save(&self.state);
    }

    /// Full trader pass for one slow tick.
    pub fn update(&mut self, ctx: TickContext<'_>) -> TickReport {
        let mut report = TickReport::default();
        let mut dirty = false;

        dirty |= self.maybe_daily_reset(ctx.now_ms, &mut report);
        dirty |= self.settle_expired(&ctx, &mut report);
        dirty |= self.scan_exits(&ctx, &mut report);

        if ctx.rec.action == Action::Enter {
            match self.try_enter(&ctx, &mut report) {
                Ok(event) => {
                    dirty = true;
                    report.opened = Some(event);
                }
                Err(reason) => {
                    info!(reason = %reason, "Entry blocked");
                    report.blocked = Some(reason);
                }
            }
        }

        if dirty {
            self.store.save(&self.state);
        }
        report
    }

    /// Unrealized P&L of open positions on `slug`, marked at current
    /// odds net of the estimated exit fee. Positions without a quote
    /// are carried at zero.
    pub fn unrealized_pnl(&self, slug: &str, odds: &SideOdds) -> f64 {
        self.state
            .positions_on(slug)
            .filter_map(|pos| {
                let price = odds.side(pos.side)?;
                let fee = self.exit_fee(pos.shares * price, price);
                Some(pos.shares * price - fee - pos.amount)
            })
            .sum()
    }

    /// Balance plus the marked value of all open positions.
    pub fn equity(&self, slug: &str, odds: &SideOdds) -> f64 {
        let position_value: f64 = self
            .state
            .positions
            .iter()
            .map(|pos| {
                let value = match (pos.market_slug == slug, odds.side(pos.side)) {
                    (true, Some(price)) => {
                        let fee = self.exit_fee(pos.shares * price, price);
                        pos.shares * price - fee
                    }
                    // Stale or unquoted markets stay at cost basis.
                    _ => pos.amount,
                };
                value.max(0.0)
            })
            .sum();
        self.state.balance + position_value
    }

    // ── Daily reset ─────────────────────────────────────────────

    fn maybe_daily_reset(&mut self, now_ms: i64, report: &mut TickReport) -> bool {
        let today = utc_date_string(now_ms);
        if self.state.last_daily_reset == today {
            return false;
        }
        let had_prior_day = !self.state.last_daily_reset.is_empty();
        if had_prior_day {
            info!(
                day = %today,
                prior_daily_loss = self.state.daily_loss,
                "Daily risk reset"
            );
            report.daily_reset = true;
        }
        self.state.daily_loss = 0.0;
        self.state.last_daily_reset = today;
        true
    }

    // ── Settlement ──────────────────────────────────────────────

    fn settle_expired(&mut self, ctx: &TickContext<'_>, report: &mut TickReport) -> bool {
        let Some(resolution) = ctx.resolution_price else {
            return false;
        };
        let current_slug = ctx.market.map(|m| m.slug.as_str());

        let mut changed = false;
        let mut i = 0;
        while i < self.state.positions.len() {
            let pos = &self.state.positions[i];
            let on_current = current_slug == Some(pos.market_slug.as_str());
            let expired = (pos.end_date > 0 && ctx.now_ms >= pos.end_date)
                || (on_current && ctx.time_left_min <= 0.0);
            if !expired {
                i += 1;
                continue;
            }

            let won = match pos.side {
                Direction::Up => resolution >= pos.strike_price,
                Direction::Down => resolution < pos.strike_price,
            };
            let settle_price = if won { 1.0 } else { 0.0 };
            // Settlement pays out gross; no exit fee.
            let event = self.close_at(
                i,
                ctx.now_ms,
                settle_price,
                0.0,
                if won { "EXPIRY_WIN" } else { "EXPIRY_LOSS" },
                Some(won),
            );
            report.closed.push(event);
            changed = true;
        }
        changed
    }

    // ── Exit scan ───────────────────────────────────────────────

    fn scan_exits(&mut self, ctx: &TickContext<'_>, report: &mut TickReport) -> bool {
        let Some(market) = ctx.market else {
            return false;
        };

        let mut changed = false;
        let mut i = 0;
        while i < self.state.positions.len() {
            if self.state.positions[i].market_slug != market.slug {
                i += 1;
                continue;
            }
            let Some(price) = ctx.odds.side(self.state.positions[i].side) else {
                i += 1;
                continue;
            };

            let fee = self.exit_fee(self.state.positions[i].shares * price, price);
            let roi = self.state.positions[i].roi_at(price, fee);

            match self.exit_decision(&self.state.positions[i], ctx, price, roi) {
                ExitDecision::Close(reason) => {
                    let event = self.close_at(i, ctx.now_ms, price, fee, reason, None);
                    report.closed.push(event);
                    changed = true;
                }
                ExitDecision::Hold => {
                    i += 1;
                }
            }
        }
        changed
    }

    fn exit_decision(
        &self,
        pos: &Position,
        ctx: &TickContext<'_>,
        price: f64,
        roi: f64,
    ) -> ExitDecision {
        // Time guard: salvage middling positions before the book dries up.
        let guard_min = if pos.strategy == StrategyTag::LateWindow {
            self.cfg.late_window_time_guard_minutes
        } else {
            self.cfg.time_guard_minutes
        };
        if ctx.time_left_min <= guard_min {
            let favored = price > 0.50;
            let hopeful = price > 0.20 && ctx.trend.favors(pos.side);
            let near_loss = price <= self.cfg.resolution_threshold;
            if !(favored || hopeful || near_loss) {
                return ExitDecision::Close("TIME_GUARD");
            }
        }

        // Hard stop, after the post-entry grace period.
        let age_ms = ctx.now_ms - pos.entry_time;
        if roi <= self.cfg.stop_loss_roi_pct / 100.0
            && age_ms >= self.cfg.stop_loss_grace_period_seconds * 1000
        {
            return ExitDecision::Close("STOP_LOSS");
        }

        // Take-profit policy is strategy-specific.
        match pos.strategy {
            StrategyTag::Momentum => {
                if roi >= self.cfg.momentum_take_profit_roi_pct / 100.0 {
                    return ExitDecision::Close("TAKE_PROFIT");
                }
            }
            StrategyTag::MeanReversion => {
                if price >= 0.50 {
                    return ExitDecision::Close("TAKE_PROFIT");
                }
                if ctx.time_left_min <= self.cfg.mean_reversion_time_stop_min {
                    return ExitDecision::Close("TIME_STOP");
                }
            }
            // Late window holds to expiry by design of the entry.
            StrategyTag::LateWindow => {}
            StrategyTag::Sniper => {
                if roi >= self.cfg.take_profit_roi_pct / 100.0 {
                    return ExitDecision::Close("TAKE_PROFIT");
                }
            }
        }

        ExitDecision::Hold
    }

    // ── Entry ───────────────────────────────────────────────────

    fn try_enter(
        &mut self,
        ctx: &TickContext<'_>,
        report: &mut TickReport,
    ) -> Result<OpenEvent, String> {
        let rec = ctx.rec;
        let side = rec.side.ok_or("Recommendation missing side")?;
        let strategy = rec.strategy.ok_or("Recommendation missing strategy")?;
        let market = ctx.market.ok_or("No market")?;
        let strike = ctx.strike.ok_or("No strike")?;
        let price = ctx
            .odds
            .side(side)
            .filter(|p| *p > 0.0 && *p < 1.0)
            .ok_or("No quote for side")?;

        if !(self.cfg.min_entry_price..=self.cfg.max_entry_price).contains(&price) {
            return Err("Entry price out of band".into());
        }
        if self.state.consecutive_losses >= self.cfg.max_consecutive_losses {
            return Err("Circuit Breaker (consecutive losses)".into());
        }
        if self
            .state
            .positions_on(&market.slug)
            .any(|p| p.side == side && p.strategy == strategy)
        {
            return Err("Duplicate position on market".into());
        }
        let loss_cap = self.state.balance * self.cfg.daily_loss_limit_pct / 100.0;
        if self.state.daily_loss >= loss_cap {
            return Err("Daily Loss Limit (%)".into());
        }
        if self.state.last_stop_loss_time > 0
            && ctx.now_ms - self.state.last_stop_loss_time
                < (self.cfg.cooldown_minutes * 60_000.0) as i64
        {
            return Err("Stop-loss cooldown".into());
        }
        if self.state.last_entry_time > 0
            && ctx.now_ms - self.state.last_entry_time < self.cfg.entry_cooldown_seconds * 1000
        {
            return Err("Entry debounce".into());
        }

        // Flip-flop: liquidate opposite-side exposure first.
        let mut i = 0;
        while i < self.state.positions.len() {
            let pos = &self.state.positions[i];
            if pos.market_slug == market.slug && pos.side == side.opposite() {
                let exit_price = ctx
                    .odds
                    .side(pos.side)
                    .unwrap_or((1.0 - price).clamp(0.01, 0.99));
                let fee = self.exit_fee(pos.shares * exit_price, exit_price);
                let event = self.close_at(i, ctx.now_ms, exit_price, fee, "FLIP_CLOSE", None);
                report.closed.push(event);
            } else {
                i += 1;
            }
        }

        if self.state.positions_on(&market.slug).count() >= self.cfg.max_concurrent_positions {
            return Err("Max concurrent positions".into());
        }

        let stake = self.stake_for(rec, strategy, price);
        let fee = fees::fee_for(
            stake,
            price,
            self.cfg.use_polymarket_dynamic_fees,
            self.cfg.fee_pct,
        );
        if self.state.balance < stake + fee {
            return Err("Insufficient balance".into());
        }

        self.state.balance -= stake + fee;
        let shares = stake / price;
        self.state.positions.push(Position {
            market_slug: market.slug.clone(),
            side,
            entry_price: price,
            amount: stake + fee,
            shares,
            entry_time: ctx.now_ms,
            strategy,
            strike_price: strike,
            end_date: market.end_date_ms,
            hit_breakeven_trigger: false,
        });
        self.state.last_entry_time = ctx.now_ms;

        info!(
            slug = %market.slug,
            side = %side,
            strategy = %strategy,
            price = price,
            stake = stake,
            fee = fee,
            balance = self.state.balance,
            "Paper position opened"
        );
        Ok(OpenEvent {
            ts_ms: ctx.now_ms,
            market_slug: market.slug.clone(),
            side,
            strategy,
            price,
            stake,
            fee,
            shares,
            balance_after: self.state.balance,
            reason: rec.reason.clone(),
        })
    }

    /// Kelly stake when enabled and the model produced a probability;
    /// fixed per-strategy stakes otherwise.
    fn stake_for(&self, rec: &Recommendation, strategy: StrategyTag, price: f64) -> f64 {
        if self.cfg.use_kelly {
            if let Some(p) = rec.probability {
                return kelly::kelly_stake(
                    self.state.balance,
                    p,
                    price,
                    self.cfg.kelly_fraction,
                    self.cfg.min_kelly_bet,
                    self.cfg.max_kelly_bet,
                );
            }
        }
        match strategy {
            StrategyTag::LateWindow => 5.0,
            StrategyTag::Momentum => 4.0,
            StrategyTag::MeanReversion => 3.0,
            StrategyTag::Sniper => self.cfg.min_bet,
        }
    }

    // ── Bookkeeping ─────────────────────────────────────────────

    fn exit_fee(&self, gross: f64, price: f64) -> f64 {
        fees::fee_for(
            gross,
            price,
            self.cfg.use_polymarket_dynamic_fees,
            self.cfg.fee_pct,
        )
    }

    /// Close positions[index] at `price` with `fee`, updating balance,
    /// the results ring, daily loss and streak counters.
    fn close_at(
        &mut self,
        index: usize,
        now_ms: i64,
        price: f64,
        fee: f64,
        reason: &str,
        resolved: Option<bool>,
    ) -> CloseEvent {
        let pos = self.state.positions.remove(index);
        let proceeds = (pos.shares * price - fee).max(0.0);
        self.state.balance += proceeds;
        let pnl = proceeds - pos.amount;

        let result = match resolved {
            Some(true) => TradeResult::Win,
            Some(false) => TradeResult::Loss,
            None => {
                if pnl > 0.0 {
                    TradeResult::Win
                } else {
                    TradeResult::Loss
                }
            }
        };

        self.state.recent_results.push_back(result);
        while self.state.recent_results.len() > RECENT_RESULTS_CAP {
            self.state.recent_results.pop_front();
        }

        self.state.daily_loss += (-pnl).max(0.0) - pnl.max(0.0);
        match result {
            TradeResult::Win => self.state.consecutive_losses = 0,
            TradeResult::Loss => self.state.consecutive_losses += 1,
        }
        if reason.contains("STOP_LOSS") {
            self.state.last_stop_loss_time = now_ms;
        }
        self.state.last_exit_time = now_ms;

        if pnl < 0.0 {
            warn!(
                slug = %pos.market_slug,
                side = %pos.side,
                reason = reason,
                pnl = format!("{pnl:.2}"),
                balance = format!("{:.2}", self.state.balance),
                "Paper position closed at a loss"
            );
        } else {
            info!(
                slug = %pos.market_slug,
                side = %pos.side,
                reason = reason,
                pnl = format!("{pnl:.2}"),
                balance = format!("{:.2}", self.state.balance),
                "Paper position closed"
            );
        }

        CloseEvent {
            ts_ms: now_ms,
            market_slug: pos.market_slug,
            side: pos.side,
            strategy: pos.strategy,
            entry_price: pos.entry_price,
            exit_price: price,
            shares: pos.shares,
            amount: pos.amount,
            fee,
            pnl,
            reason: reason.to_string(),
            result,
            balance_after: self.state.balance,
        }
    }
}

enum ExitDecision {
    Close(&'static str),
    Hold,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::Confidence;

    // 2024-03-10 10:30:00 UTC, aligned to a 15-minute boundary.
    const NOW: i64 = 1_710_066_600_000;

    fn paper_cfg() -> PaperConfig {
        AppConfig::load().unwrap().paper
    }

    fn trader() -> PaperTrader {
        PaperTrader::new(paper_cfg(), StateStore::ephemeral())
    }

    fn market(slug: &str, end_date_ms: i64) -> Market {
        Market {
            slug: slug.into(),
            question: "Bitcoin Up or Down?".into(),
            outcomes: vec!["Up".into(), "Down".into()],
            clob_token_ids: vec!["111".into(), "222".into()],
            end_date_ms,
            metadata: Default::default(),
        }
    }

    fn enter_rec(side: Direction, strategy: StrategyTag, probability: f64) -> Recommendation {
        let mut rec = Recommendation::enter(side, strategy, Confidence::High, "test_entry");
        rec.probability = Some(probability);
        rec.edge = Some(0.1);
        rec
    }

    fn odds(up: f64, down: f64) -> SideOdds {
        SideOdds {
            up: Some(up),
            down: Some(down),
        }
    }

    fn ctx<'a>(
        now_ms: i64,
        rec: &'a Recommendation,
        market: &'a Market,
        odds_v: SideOdds,
        time_left_min: f64,
    ) -> TickContext<'a> {
        TickContext {
            now_ms,
            rec,
            odds: odds_v,
            market: Some(market),
            trend: Trend::Rising,
            time_left_min,
            resolution_price: Some(100_050.0),
            strike: Some(100_000.0),
        }
    }

    fn open_up(trader: &mut PaperTrader, m: &Market, entry_price: f64) -> OpenEvent {
        let rec = enter_rec(Direction::Up, StrategyTag::Momentum, 0.70);
        let report = trader.update(ctx(NOW, &rec, m, odds(entry_price, 1.0 - entry_price), 8.0));
        assert!(report.blocked.is_none(), "blocked: {:?}", report.blocked);
        report.opened.expect("position opened")
    }

    #[test]
    fn open_conserves_balance() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        let before = t.balance();
        let opened = open_up(&mut t, &m, 0.60);

        // Kelly: f = (0.70 - 0.60) / 0.40 = 0.25 -> 100 * 0.5 * 0.25 = 12.5,
        // clamped to the $5 max bet.
        assert!((opened.stake - 5.0).abs() < 1e-9);
        assert!((before - (opened.stake + opened.fee) - t.balance()).abs() < 1e-9);
        let pos = &t.state().positions[0];
        assert!((pos.amount - (opened.stake + opened.fee)).abs() < 1e-9);
        assert!((pos.shares - opened.stake / 0.60).abs() < 1e-9);
        assert!(pos.shares > 0.0);
    }

    #[test]
    fn kelly_raw_stake_clamps_to_band() {
        // Scenario: p 0.70, price 0.50, balance 100, fraction 0.5,
        // band [3, 5] -> raw 20 clamps to 5.
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        let opened = open_up(&mut t, &m, 0.50);
        assert!((opened.stake - 5.0).abs() < 1e-9);
    }

    #[test]
    fn fixed_stakes_without_kelly() {
        let mut cfg = paper_cfg();
        cfg.use_kelly = false;
        let mut t = PaperTrader::new(cfg, StateStore::ephemeral());
        let m = market("btc-15m-a", NOW + 480_000);
        let rec = enter_rec(Direction::Up, StrategyTag::LateWindow, 0.70);
        let report = t.update(ctx(NOW, &rec, &m, odds(0.60, 0.40), 8.0));
        assert!((report.opened.unwrap().stake - 5.0).abs() < 1e-9);
    }

    #[test]
    fn settlement_win_pays_one_no_fee() {
        // Open UP at 0.45, strike 100_000; at expiry resolution 100_050.
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.consecutive_losses = 2;
        let opened = open_up(&mut t, &m, 0.45);
        let balance_after_open = t.balance();

        let rec = Recommendation::no_trade("window_closing");
        let report = t.update(ctx(NOW + 500_000, &rec, &m, odds(0.99, 0.01), -0.2));

        assert_eq!(report.closed.len(), 1);
        let closed = &report.closed[0];
        assert_eq!(closed.result, TradeResult::Win);
        assert_eq!(closed.reason, "EXPIRY_WIN");
        assert_eq!(closed.exit_price, 1.0);
        assert_eq!(closed.fee, 0.0);
        assert!((closed.pnl - (closed.shares - closed.amount)).abs() < 1e-9);
        assert!((t.balance() - (balance_after_open + closed.shares)).abs() < 1e-9);
        assert_eq!(t.state().consecutive_losses, 0);
        assert_eq!(t.state().recent_results.back(), Some(&TradeResult::Win));
        assert!(t.state().positions.is_empty());
        assert!((opened.shares - closed.shares).abs() < 1e-9);
    }

    #[test]
    fn settlement_loss_pays_zero() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.45);

        let rec = Recommendation::no_trade("window_closing");
        let mut c = ctx(NOW + 500_000, &rec, &m, odds(0.01, 0.99), -0.2);
        c.resolution_price = Some(99_900.0); // below strike -> UP loses
        let report = t.update(c);

        let closed = &report.closed[0];
        assert_eq!(closed.result, TradeResult::Loss);
        assert_eq!(closed.reason, "EXPIRY_LOSS");
        assert!((closed.pnl + closed.amount).abs() < 1e-9);
        assert_eq!(t.state().consecutive_losses, 1);
        assert!(t.state().daily_loss > 0.0);
    }

    #[test]
    fn time_guard_holds_favored_position() {
        // Scenario: open UP at 0.55, timeLeft 1.8, price 0.58, trend RISING.
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.58, 0.42), 1.8));
        assert!(report.closed.is_empty());
        assert_eq!(t.state().positions.len(), 1);
    }

    #[test]
    fn time_guard_exits_middling_position() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        // 0.42: not favored (<= 0.5), trend against, not near-loss.
        let mut c = ctx(NOW + 31_000, &rec, &m, odds(0.42, 0.58), 1.8);
        c.trend = Trend::Falling;
        let report = t.update(c);
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, "TIME_GUARD");
    }

    #[test]
    fn time_guard_exempts_near_loss_price() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        let mut c = ctx(NOW + 31_000, &rec, &m, odds(0.04, 0.96), 1.8);
        c.trend = Trend::Falling;
        let report = t.update(c);
        // A nearly-resolved loser is exempt from the time guard (it may
        // still close via the unconditional hard stop).
        assert!(report.closed.iter().all(|e| e.reason != "TIME_GUARD"));
    }

    #[test]
    fn hard_stop_respects_grace_period() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        // ROI at 0.30 is about -46%: past the -40% stop.
        let inside_grace = t.update(ctx(NOW + 10_000, &rec, &m, odds(0.30, 0.70), 6.0));
        assert!(inside_grace.closed.is_empty());

        let past_grace = t.update(ctx(NOW + 16_000, &rec, &m, odds(0.30, 0.70), 6.0));
        assert_eq!(past_grace.closed.len(), 1);
        assert_eq!(past_grace.closed[0].reason, "STOP_LOSS");
        assert_eq!(t.state().last_stop_loss_time, NOW + 16_000);
    }

    #[test]
    fn stop_loss_cooldown_blocks_reentry() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);
        let rec = Recommendation::no_trade("no_signal");
        t.update(ctx(NOW + 16_000, &rec, &m, odds(0.30, 0.70), 6.0));

        let rec = enter_rec(Direction::Up, StrategyTag::Momentum, 0.70);
        let report = t.update(ctx(NOW + 60_000, &rec, &m, odds(0.55, 0.45), 6.0));
        assert_eq!(report.blocked.as_deref(), Some("Stop-loss cooldown"));
    }

    #[test]
    fn momentum_take_profit_fires_at_fifty_percent_roi() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.88, 0.12), 6.0));
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, "TAKE_PROFIT");
        assert!(report.closed[0].pnl > 0.0);
    }

    #[test]
    fn daily_loss_cap_blocks_entry() {
        // Scenario: balance 100, limit 30%, dailyLoss 30.01 -> blocked.
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.daily_loss = 30.01;
        t.state.last_daily_reset = utc_date_string(NOW);
        let rec = enter_rec(Direction::Up, StrategyTag::Momentum, 0.70);
        let report = t.update(ctx(NOW, &rec, &m, odds(0.60, 0.40), 8.0));
        assert_eq!(report.blocked.as_deref(), Some("Daily Loss Limit (%)"));
        assert!(t.state().positions.is_empty());
    }

    #[test]
    fn circuit_breaker_blocks_after_streak() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.consecutive_losses = 3;
        let rec = enter_rec(Direction::Up, StrategyTag::Momentum, 0.70);
        let report = t.update(ctx(NOW, &rec, &m, odds(0.60, 0.40), 8.0));
        assert_eq!(
            report.blocked.as_deref(),
            Some("Circuit Breaker (consecutive losses)")
        );
    }

    #[test]
    fn price_band_blocks_extreme_entries() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        let rec = enter_rec(Direction::Up, StrategyTag::Momentum, 0.99);
        let report = t.update(ctx(NOW, &rec, &m, odds(0.97, 0.03), 8.0));
        assert_eq!(report.blocked.as_deref(), Some("Entry price out of band"));
    }

    #[test]
    fn entry_debounce_blocks_rapid_fire() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.60);
        let rec = enter_rec(Direction::Up, StrategyTag::Sniper, 0.70);
        let report = t.update(ctx(NOW + 5_000, &rec, &m, odds(0.60, 0.40), 8.0));
        assert_eq!(report.blocked.as_deref(), Some("Entry debounce"));
    }

    #[test]
    fn duplicate_guard_blocks_same_strategy_side() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.60);
        let rec = enter_rec(Direction::Up, StrategyTag::Momentum, 0.70);
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.60, 0.40), 7.0));
        assert_eq!(report.blocked.as_deref(), Some("Duplicate position on market"));
    }

    #[test]
    fn capacity_caps_positions_per_slug() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.60);

        // Different strategy passes the duplicate guard, fills capacity.
        let rec = enter_rec(Direction::Up, StrategyTag::Sniper, 0.70);
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.60, 0.40), 7.0));
        assert!(report.opened.is_some());
        assert_eq!(t.state().positions.len(), 2);

        let rec = enter_rec(Direction::Up, StrategyTag::LateWindow, 0.70);
        let report = t.update(ctx(NOW + 62_000, &rec, &m, odds(0.60, 0.40), 6.0));
        assert_eq!(report.blocked.as_deref(), Some("Max concurrent positions"));
        assert!(t.state().positions.len() <= t.cfg.max_concurrent_positions);
    }

    #[test]
    fn flip_closes_opposite_side_then_opens() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.60);
        assert_eq!(t.state().positions[0].side, Direction::Up);

        let rec = enter_rec(Direction::Down, StrategyTag::Momentum, 0.70);
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.40, 0.60), 7.0));

        assert!(report.closed.iter().any(|e| e.reason == "FLIP_CLOSE"));
        assert!(report.opened.is_some());
        // No opposite-side positions remain.
        assert!(t
            .state()
            .positions_on("btc-15m-a")
            .all(|p| p.side == Direction::Down));
    }

    #[test]
    fn daily_reset_zeroes_loss_on_utc_rollover() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.daily_loss = 12.0;
        t.state.last_daily_reset = "2024-03-09".into();

        let rec = Recommendation::no_trade("no_signal");
        let report = t.update(ctx(NOW, &rec, &m, odds(0.60, 0.40), 8.0));
        assert!(report.daily_reset);
        assert_eq!(t.state().daily_loss, 0.0);
        assert_eq!(t.state().last_daily_reset, utc_date_string(NOW));
    }

    #[test]
    fn wins_reduce_daily_loss() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.daily_loss = 10.0;
        t.state.last_daily_reset = utc_date_string(NOW);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.88, 0.12), 6.0));
        let closed = &report.closed[0];
        assert!(closed.pnl > 0.0);
        assert!((t.state().daily_loss - (10.0 - closed.pnl)).abs() < 1e-9);
    }

    #[test]
    fn recent_results_ring_is_bounded() {
        let mut t = trader();
        for _ in 0..15 {
            t.state.recent_results.push_back(TradeResult::Loss);
        }
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);
        let rec = Recommendation::no_trade("no_signal");
        t.update(ctx(NOW + 31_000, &rec, &m, odds(0.88, 0.12), 6.0));
        assert!(t.state().recent_results.len() <= RECENT_RESULTS_CAP);
    }

    #[test]
    fn legacy_mean_reversion_positions_still_exit() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.positions.push(Position {
            market_slug: "btc-15m-a".into(),
            side: Direction::Up,
            entry_price: 0.35,
            amount: 3.05,
            shares: 3.0 / 0.35,
            entry_time: NOW - 120_000,
            strategy: StrategyTag::MeanReversion,
            strike_price: 100_000.0,
            end_date: NOW + 480_000,
            hit_breakeven_trigger: false,
        });

        let rec = Recommendation::no_trade("no_signal");
        let report = t.update(ctx(NOW, &rec, &m, odds(0.52, 0.48), 8.0));
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, "TAKE_PROFIT");

        // Time stop variant: price below 0.50 with 3 minutes left.
        t.state.positions.push(Position {
            market_slug: "btc-15m-a".into(),
            side: Direction::Up,
            entry_price: 0.35,
            amount: 3.05,
            shares: 3.0 / 0.35,
            entry_time: NOW - 120_000,
            strategy: StrategyTag::MeanReversion,
            strike_price: 100_000.0,
            end_date: NOW + 480_000,
            hit_breakeven_trigger: false,
        });
        let report = t.update(ctx(NOW + 60_000, &rec, &m, odds(0.40, 0.60), 2.5));
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, "TIME_STOP");
    }

    #[test]
    fn pullback_below_take_profit_is_held() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        open_up(&mut t, &m, 0.55);

        let rec = Recommendation::no_trade("no_signal");
        // ROI ~ +29% at 0.73: below the 50% momentum take-profit.
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.73, 0.27), 6.0));
        assert!(report.closed.is_empty());
        assert!(!t.state().positions[0].hit_breakeven_trigger);

        // Retrace to entry: no exit rule matches, the position rides on.
        let report = t.update(ctx(NOW + 62_000, &rec, &m, odds(0.55, 0.45), 5.0));
        assert!(report.closed.is_empty());
        assert_eq!(t.state().positions.len(), 1);
    }

    #[test]
    fn late_window_holds_to_expiry_without_take_profit() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        t.state.positions.push(Position {
            market_slug: "btc-15m-a".into(),
            side: Direction::Up,
            entry_price: 0.55,
            amount: 5.08,
            shares: 5.0 / 0.55,
            entry_time: NOW - 60_000,
            strategy: StrategyTag::LateWindow,
            strike_price: 100_000.0,
            end_date: NOW + 480_000,
            hit_breakeven_trigger: false,
        });

        let rec = Recommendation::no_trade("no_signal");
        // Deep in profit, then back to flat: late window never takes
        // profit early, only its 0.5-minute guard or expiry close it.
        let report = t.update(ctx(NOW, &rec, &m, odds(0.90, 0.10), 4.0));
        assert!(report.closed.is_empty());
        let report = t.update(ctx(NOW + 31_000, &rec, &m, odds(0.55, 0.45), 3.5));
        assert!(report.closed.is_empty());

        // Settlement is what finally closes it.
        let report = t.update(ctx(NOW + 500_000, &rec, &m, odds(0.99, 0.01), -0.2));
        assert_eq!(report.closed.len(), 1);
        assert_eq!(report.closed[0].reason, "EXPIRY_WIN");
    }

    #[test]
    fn unrealized_pnl_marks_open_positions() {
        let mut t = trader();
        let m = market("btc-15m-a", NOW + 480_000);
        let opened = open_up(&mut t, &m, 0.50);

        let marked = t.unrealized_pnl("btc-15m-a", &odds(0.60, 0.40));
        let gross = opened.shares * 0.60;
        let fee = fees::fee_for(gross, 0.60, true, 1.0);
        assert!((marked - (gross - fee - (opened.stake + opened.fee))).abs() < 1e-9);

        let equity = t.equity("btc-15m-a", &odds(0.60, 0.40));
        assert!((equity - (t.balance() + gross - fee)).abs() < 1e-9);
    }
}
