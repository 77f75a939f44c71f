//! End-to-end flow tests: ticks -> candles -> snapshot -> strategy ->
//! paper trader -> settlement, plus cross-cutting determinism checks.

use strikebot::candles::CandleRing;
use strikebot::config::AppConfig;
use strikebot::indicators;
use strikebot::paper::{PaperTrader, StateStore, TickContext};
use strikebot::snapshot;
use strikebot::strategy;
use strikebot::types::{
    Action, Candle, Direction, Market, Recommendation, SideOdds, StrategyTag, Trend, TradeResult,
};

// 2024-03-10 10:30:00 UTC, on a 15-minute boundary.
const WINDOW_START: i64 = 1_710_066_600_000;
const WINDOW_END: i64 = WINDOW_START + 900_000;

fn market() -> Market {
    Market {
        slug: "bitcoin-up-or-down-15m-1030".into(),
        question: "Bitcoin Up or Down - price to beat $100,000.00?".into(),
        outcomes: vec!["Up".into(), "Down".into()],
        clob_token_ids: vec!["111".into(), "222".into()],
        end_date_ms: WINDOW_END,
        metadata: Default::default(),
    }
}

/// Stream a rising tape into the ring: one tick every 10 s, drifting up.
fn build_candles(start_price: f64, drift_per_min: f64, minutes: usize) -> Vec<Candle> {
    let mut ring = CandleRing::new(400);
    let t0 = WINDOW_START - (minutes as i64) * 60_000;
    for i in 0..(minutes * 6) {
        let ts = t0 + i as i64 * 10_000;
        let price = start_price + (i as f64 / 6.0) * drift_per_min;
        ring.on_tick(ts, price);
    }
    ring.last_n(snapshot::CANDLE_WINDOW)
}

#[test]
fn candle_stream_feeds_a_formed_snapshot() {
    let candles = build_candles(99_000.0, 12.0, 60);
    assert!(candles.len() >= 30);
    for pair in candles.windows(2) {
        assert_eq!(pair[0].open_time % 60_000, 0);
        assert_eq!(pair[0].close_time(), pair[1].open_time);
    }

    let cfg = AppConfig::load().unwrap();
    let spot = candles.last().unwrap().close + 20.0;
    let snap = snapshot::assemble(
        WINDOW_START + 60_000,
        spot,
        Some(spot - 5.0),
        Some(market()),
        Some(100_000.0),
        SideOdds {
            up: Some(0.55),
            down: Some(0.45),
        },
        candles,
        cfg.strategy.vwap_window,
    );
    assert!(snap.indicators.is_formed());
    assert_eq!(snap.trend, Trend::Rising);
    assert!(snap.time_left_min > 0.0 && snap.time_left_min <= 15.0);
}

#[test]
fn evaluator_only_ever_returns_a_reason() {
    let cfg = AppConfig::load().unwrap();
    let candles = build_candles(99_000.0, 12.0, 60);
    let spot = candles.last().unwrap().close;

    for time_left in [14.0, 8.0, 1.9, 1.2, 0.8, 0.4, -0.1] {
        let mut snap = snapshot::assemble(
            WINDOW_START,
            spot,
            None,
            Some(market()),
            Some(spot - 10.0),
            SideOdds {
                up: Some(0.55),
                down: Some(0.45),
            },
            candles.clone(),
            cfg.strategy.vwap_window,
        );
        snap.time_left_min = time_left;
        let rec = strategy::evaluate(&snap, &cfg.strategy);
        assert!(!rec.reason.is_empty(), "empty reason at t={time_left}");
        if rec.action == Action::Enter {
            assert!(rec.side.is_some() && rec.strategy.is_some());
            assert!(rec.probability.is_some());
        }
    }
}

#[test]
fn full_cycle_enter_hold_settle() {
    let paper_cfg = AppConfig::load().unwrap().paper;
    let mut trader = PaperTrader::new(paper_cfg, StateStore::ephemeral());
    let m = market();
    let odds = SideOdds {
        up: Some(0.60),
        down: Some(0.40),
    };

    // Enter UP mid-window.
    let mut rec = Recommendation::enter(
        Direction::Up,
        StrategyTag::Momentum,
        strikebot::types::Confidence::High,
        "momentum_up_diff_120",
    );
    rec.probability = Some(0.72);
    rec.edge = Some(0.12);

    let report = trader.update(TickContext {
        now_ms: WINDOW_START + 300_000,
        rec: &rec,
        odds,
        market: Some(&m),
        trend: Trend::Rising,
        time_left_min: 10.0,
        resolution_price: Some(100_120.0),
        strike: Some(100_000.0),
    });
    let opened = report.opened.expect("entry passes all gates");
    assert_eq!(trader.state().positions.len(), 1);

    // Position conservation: amount = stake + fee; balance dropped by it.
    let pos = &trader.state().positions[0];
    assert!((pos.amount - (opened.stake + opened.fee)).abs() < 1e-9);
    assert!(pos.entry_price > 0.0 && pos.entry_price < 1.0);

    // Hold through a favored time-guard check.
    let hold = Recommendation::no_trade("no_signal");
    let report = trader.update(TickContext {
        now_ms: WINDOW_END - 108_000,
        rec: &hold,
        odds: SideOdds {
            up: Some(0.58),
            down: Some(0.42),
        },
        market: Some(&m),
        trend: Trend::Rising,
        time_left_min: 1.8,
        resolution_price: Some(100_090.0),
        strike: Some(100_000.0),
    });
    assert!(report.closed.is_empty());

    // Settle above the strike: full payout, no exit fee, WIN recorded.
    let balance_before = trader.balance();
    let report = trader.update(TickContext {
        now_ms: WINDOW_END + 1_000,
        rec: &hold,
        odds: SideOdds::default(),
        market: Some(&m),
        trend: Trend::Rising,
        time_left_min: -0.02,
        resolution_price: Some(100_050.0),
        strike: Some(100_000.0),
    });
    assert_eq!(report.closed.len(), 1);
    let closed = &report.closed[0];
    assert_eq!(closed.result, TradeResult::Win);
    assert_eq!(closed.exit_price, 1.0);
    assert_eq!(closed.fee, 0.0);
    assert!((trader.balance() - (balance_before + closed.shares)).abs() < 1e-9);
    assert!(trader.state().positions.is_empty());
    assert_eq!(trader.state().consecutive_losses, 0);
}

#[test]
fn indicator_values_survive_serialization_round_trip() {
    // Identical inputs must give identical outputs, including after a
    // serde round trip of the candle series.
    let candles = build_candles(99_000.0, -7.0, 50);
    let json = serde_json::to_string(&candles).unwrap();
    let restored: Vec<Candle> = serde_json::from_str(&json).unwrap();

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let closes2: Vec<f64> = restored.iter().map(|c| c.close).collect();

    assert_eq!(
        indicators::ema(&closes, 21),
        indicators::ema(&closes2, 21)
    );
    assert_eq!(
        indicators::rsi(&closes, 14),
        indicators::rsi(&closes2, 14)
    );
    assert_eq!(
        indicators::macd(&closes, 12, 26, 9),
        indicators::macd(&closes2, 12, 26, 9)
    );
    assert_eq!(
        indicators::session_vwap(&candles),
        indicators::session_vwap(&restored)
    );
}

#[test]
fn capacity_invariant_holds_across_a_session() {
    let paper_cfg = AppConfig::load().unwrap().paper;
    let cap = paper_cfg.max_concurrent_positions;
    let mut trader = PaperTrader::new(paper_cfg, StateStore::ephemeral());
    let m = market();

    let strategies = [
        StrategyTag::Momentum,
        StrategyTag::Sniper,
        StrategyTag::LateWindow,
    ];
    for (i, strategy) in strategies.iter().enumerate() {
        let mut rec = Recommendation::enter(
            Direction::Up,
            *strategy,
            strikebot::types::Confidence::High,
            "test",
        );
        rec.probability = Some(0.72);
        trader.update(TickContext {
            now_ms: WINDOW_START + (i as i64) * 31_000,
            rec: &rec,
            odds: SideOdds {
                up: Some(0.60),
                down: Some(0.40),
            },
            market: Some(&m),
            trend: Trend::Rising,
            time_left_min: 10.0,
            resolution_price: Some(100_120.0),
            strike: Some(100_000.0),
        });
        assert!(trader.state().positions.len() <= cap);
    }
    assert_eq!(trader.state().positions.len(), cap);
}
