//! On-chain (Chainlink) price feed.
//!
//! Primary path is a WS stream of oracle rounds; when the stream goes
//! silent past the staleness budget, a REST fallback polls the
//! aggregator's `latestRoundData()` through plain JSON-RPC. This is the
//! price the markets resolve against, so it feeds strike latching and
//! settlement.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::feeds::PriceCell;

/// latestRoundData() selector, first 4 bytes of its keccak hash.
const LATEST_ROUND_DATA_SELECTOR: &str = "0xfeaf968c";

/// Chainlink BTC/USD aggregators answer with 8 decimals.
const ANSWER_DECIMALS: u32 = 8;

/// Run the on-chain price reader: WS rounds with REST fallback.
pub async fn run_chain_feed(
    wss_url: String,
    rpc_url: String,
    aggregator: String,
    stale_ms: i64,
    reconnect_delay_ms: u64,
    cell: Arc<PriceCell>,
) {
    // Fallback poller owns staleness detection; it is a no-op while the
    // WS path keeps the cell fresh.
    let poll_cell = cell.clone();
    let poll_rpc = rpc_url.clone();
    let poll_agg = aggregator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis((stale_ms / 2).max(1_000) as u64));
        loop {
            interval.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            if !poll_cell.is_stale(now_ms, stale_ms) {
                continue;
            }
            match fetch_latest_round(&poll_rpc, &poll_agg).await {
                Ok(price) => {
                    debug!(price, "Chainlink REST fallback price");
                    poll_cell.store(now_ms, price);
                }
                Err(e) => warn!(error = %e, "Chainlink REST fallback failed"),
            }
        }
    });

    if wss_url.is_empty() {
        info!("No on-chain WS endpoint configured; running on REST fallback only");
        return;
    }

    let backoff = Duration::from_millis(reconnect_delay_ms);
    loop {
        info!(url = %wss_url, "Connecting to on-chain price stream...");
        match connect_async(&wss_url).await {
            Ok((ws_stream, _)) => {
                info!("On-chain price stream connected");
                let (mut write, mut read) = ws_stream.split();
                let subscribe = serde_json::json!({
                    "action": "subscribe",
                    "subscriptions": [
                        {"topic": "crypto_prices_chainlink", "type": "update", "filters": "btc/usd"}
                    ]
                });
                if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
                    warn!(error = %e, "On-chain subscribe failed");
                }

                loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if let Some((ts, price)) = parse_round_update(&text) {
                                cell.store(ts, price);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("On-chain stream closed by server");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "On-chain stream error");
                            break;
                        }
                        None => {
                            warn!("On-chain stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "On-chain stream connection failed");
            }
        }
        tokio::time::sleep(backoff).await;
    }
}

/// Parse a round update: {"topic":"crypto_prices_chainlink",
/// "payload":{"symbol":"btc/usd","timestamp":...,"value":...}}
fn parse_round_update(text: &str) -> Option<(i64, f64)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let payload = value.get("payload")?;
    let price = payload.get("value")?.as_f64()?;
    let mut ts = payload.get("timestamp")?.as_i64()?;
    // Some feeds report seconds; normalize to milliseconds.
    if ts > 0 && ts < 1_000_000_000_000 {
        ts *= 1000;
    }
    if price <= 0.0 {
        return None;
    }
    Some((ts, price))
}

/// One-shot eth_call of latestRoundData() on the aggregator.
async fn fetch_latest_round(rpc_url: &str, aggregator: &str) -> Result<f64> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to create HTTP client")?;

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_call",
        "params": [
            {"to": aggregator, "data": LATEST_ROUND_DATA_SELECTOR},
            "latest"
        ]
    });

    let response: serde_json::Value = client
        .post(rpc_url)
        .json(&body)
        .send()
        .await
        .context("eth_call request failed")?
        .json()
        .await
        .context("eth_call response was not JSON")?;

    let result = response["result"]
        .as_str()
        .context("eth_call returned no result")?;
    decode_answer(result)
}

/// Decode the `answer` word (second of five) out of the ABI-encoded
/// latestRoundData() return value.
fn decode_answer(result_hex: &str) -> Result<f64> {
    let hex = result_hex.trim_start_matches("0x");
    if hex.len() < 64 * 2 {
        bail!("eth_call result too short: {} chars", hex.len());
    }
    let answer_word = &hex[64..128];
    let raw = i128::from_str_radix(answer_word, 16).context("Invalid answer word")?;
    if raw <= 0 {
        bail!("Aggregator answered non-positive value");
    }
    Ok(raw as f64 / 10f64.powi(ANSWER_DECIMALS as i32))
}
