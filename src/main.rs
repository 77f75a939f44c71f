//! strikebot - paper-trading decision engine for 15-minute BTC
//! binary markets.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use strikebot::config::AppConfig;
use strikebot::engine::Engine;
use strikebot::feeds::{self, PriceCell};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Fatal engine error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = AppConfig::load()?;
    info!(config = %cfg.digest(), "strikebot starting");

    // Last-value slots written by the feed tasks, read by the engine.
    let spot_cell = Arc::new(PriceCell::new());
    let chain_cell = Arc::new(PriceCell::new());
    let (tick_tx, tick_rx) = mpsc::channel(1024);

    tokio::spawn(feeds::binance::run_spot_feed(
        cfg.feeds.spot_ws_url.clone(),
        cfg.feeds.reconnect_delay_ms,
        spot_cell.clone(),
        tick_tx,
    ));
    tokio::spawn(feeds::chainlink::run_chain_feed(
        cfg.feeds.polygon_wss_url.clone(),
        cfg.feeds.polygon_rpc_url.clone(),
        cfg.feeds.chainlink_btc_usd_aggregator.clone(),
        cfg.feeds.chainlink_stale_ms,
        cfg.feeds.reconnect_delay_ms,
        chain_cell.clone(),
    ));

    #[allow(unused_mut)]
    let mut engine = Engine::new(cfg.clone(), spot_cell, chain_cell, tick_rx)?;

    #[cfg(feature = "dashboard")]
    let mut engine = {
        let hub = strikebot::dashboard::DashboardHub::new(256);
        tokio::spawn(strikebot::dashboard::serve(hub.clone(), cfg.server.port));
        engine.with_hub(hub)
    };

    engine.seed_candles().await;

    tokio::select! {
        result = engine.run() => result?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Positions survive restarts; settle them on the next run.
    engine.save_state();
    info!("strikebot stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
