//! Spot trade stream (Binance aggTrade) and kline REST backfill.
//!
//! The reader is a producer task: it stores every trade into the shared
//! last-value cell and forwards (ts, price) pairs to the candle ring via
//! an mpsc channel. Connections auto-reconnect with a fixed backoff.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::feeds::PriceCell;
use crate::types::{Candle, PriceTick};

/// Run the spot WS reader until the process shuts down.
pub async fn run_spot_feed(
    ws_url: String,
    reconnect_delay_ms: u64,
    cell: Arc<PriceCell>,
    tick_tx: Sender<PriceTick>,
) {
    let backoff = Duration::from_millis(reconnect_delay_ms);
    loop {
        info!(url = %ws_url, "Connecting to spot trade stream...");
        match connect_async(&ws_url).await {
            Ok((ws_stream, _)) => {
                info!("Spot trade stream connected");
                let (mut write, mut read) = ws_stream.split();
                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(tick) = parse_agg_trade(&text) {
                                cell.store(tick.ts, tick.price);
                                // Drop ticks when the consumer lags; the
                                // cell already holds the freshest value.
                                let _ = tick_tx.try_send(tick);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("Spot stream closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Spot stream error");
                            break;
                        }
                        None => {
                            warn!("Spot stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Spot stream connection failed");
            }
        }
        tokio::time::sleep(backoff).await;
    }
}

/// Parse a Binance aggTrade frame: {"e":"aggTrade","T":<ms>,"p":"<price>",...}
fn parse_agg_trade(text: &str) -> Option<PriceTick> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let ts = value["T"].as_i64()?;
    let price: f64 = value["p"].as_str()?.parse().ok()?;
    if price <= 0.0 {
        return None;
    }
    Some(PriceTick { ts, price })
}

/// Fetch the last `limit` one-minute candles for seeding the ring.
pub async fn fetch_recent_candles(
    rest_url: &str,
    symbol: &str,
    limit: usize,
) -> Result<Vec<Candle>> {
    let url = format!("{rest_url}?symbol={symbol}&interval=1m&limit={limit}");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(&url)
        .send()
        .await
        .context("Failed to fetch historical candles")?;
    if !response.status().is_success() {
        bail!("Kline endpoint returned error: {}", response.status());
    }

    // Response: [[open_time, open, high, low, close, volume, close_time, ...], ...]
    let klines: Vec<Vec<serde_json::Value>> = response
        .json()
        .await
        .context("Failed to parse kline response")?;

    let candles: Vec<Candle> = klines
        .into_iter()
        .filter_map(|k| {
            if k.len() < 6 {
                return None;
            }
            Some(Candle {
                open_time: k[0].as_i64()?,
                open: k[1].as_str()?.parse().ok()?,
                high: k[2].as_str()?.parse().ok()?,
                low: k[3].as_str()?.parse().ok()?,
                close: k[4].as_str()?.parse().ok()?,
                volume: k[5].as_str()?.parse().ok()?,
            })
        })
        .collect();

    info!(count = candles.len(), "Historical candles fetched");
    Ok(candles)
}
