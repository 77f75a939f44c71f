//! Strike latching.
//!
//! Resolution order per market slug:
//!   1. a number parsed out of the question text ("price to beat",
//!      "above $X", "> $X"; thousands separators tolerated)
//!   2. a plausible numeric metadata field whose key mentions
//!      price/strike/threshold/target/beat
//!   3. the first chainlink price observed after the window start,
//!      latched for the market's lifetime
//! A `strike.txt` override file, polled every ~5 s, wins over all of
//! these while it parses.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::types::Market;

/// Strikes for BTC-sized markets live well inside this band; anything
/// outside is a mis-parse.
const PLAUSIBLE_MIN: f64 = 1_000.0;
const PLAUSIBLE_MAX: f64 = 2_000_000.0;

const OVERRIDE_POLL_MS: i64 = 5_000;

pub struct StrikeTracker {
    /// Chainlink-latched strikes per market slug
    latched: HashMap<String, f64>,
    override_path: PathBuf,
    override_value: Option<f64>,
    last_override_poll: i64,
}

impl StrikeTracker {
    pub fn new(override_path: impl Into<PathBuf>) -> Self {
        Self {
            latched: HashMap::new(),
            override_path: override_path.into(),
            override_value: None,
            last_override_poll: 0,
        }
    }

    /// Resolve the strike for `market`, latching from chainlink when the
    /// question and metadata yield nothing.
    pub fn strike_for(
        &mut self,
        market: &Market,
        chainlink: Option<f64>,
        now_ms: i64,
    ) -> Option<f64> {
        self.poll_override(now_ms);
        if let Some(v) = self.override_value {
            return Some(v);
        }

        if let Some(v) = parse_question_strike(&market.question) {
            return Some(v);
        }
        if let Some(v) = metadata_strike(market) {
            return Some(v);
        }

        if let Some(v) = self.latched.get(&market.slug) {
            return Some(*v);
        }

        // Latch only after the window has started; a pre-window price is
        // not the resolution reference.
        if let Some(price) = chainlink {
            if now_ms >= market.window_start_ms() {
                info!(
                    slug = %market.slug,
                    strike = price,
                    "Latched chainlink price as strike"
                );
                self.latched.insert(market.slug.clone(), price);
                // Old windows never come back; keep the map small.
                if self.latched.len() > 64 {
                    let slug = market.slug.clone();
                    self.latched.retain(|k, _| *k == slug);
                }
                return Some(price);
            }
        }
        None
    }

    /// Re-read `strike.txt` at most once per poll interval.
    pub fn poll_override(&mut self, now_ms: i64) {
        if now_ms - self.last_override_poll < OVERRIDE_POLL_MS {
            return;
        }
        self.last_override_poll = now_ms;

        match std::fs::read_to_string(&self.override_path) {
            Ok(text) => {
                let parsed = parse_number(text.trim());
                if parsed.is_some() && parsed != self.override_value {
                    info!(path = %self.override_path.display(), value = ?parsed, "Strike override active");
                } else if parsed.is_none() && !text.trim().is_empty() {
                    warn!(path = %self.override_path.display(), "Unparseable strike override ignored");
                }
                self.override_value = parsed;
            }
            Err(_) => {
                // No file, no override.
                self.override_value = None;
            }
        }
    }
}

/// Scan the question text for the strike number.
///
/// Recognizes the phrasing family used by the 15-minute BTC markets:
/// "...price to beat $97,250.00...", "above $97,250", "> $97250".
fn parse_question_strike(question: &str) -> Option<f64> {
    let lower = question.to_lowercase();
    for marker in ["price to beat", "above", ">"] {
        if let Some(pos) = lower.find(marker) {
            if let Some(v) = first_number_after(&lower[pos + marker.len()..]) {
                return Some(v);
            }
        }
    }
    None
}

/// Search metadata for a plausible strike under keys mentioning
/// price/strike/threshold/target/beat.
fn metadata_strike(market: &Market) -> Option<f64> {
    for (key, value) in &market.metadata {
        let k = key.to_lowercase();
        if !["price", "strike", "threshold", "target", "beat"]
            .iter()
            .any(|needle| k.contains(needle))
        {
            continue;
        }
        let num = match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => parse_number(s),
            _ => None,
        };
        if let Some(v) = num {
            if v > PLAUSIBLE_MIN && v < PLAUSIBLE_MAX {
                return Some(v);
            }
        }
    }
    None
}

/// First plausible number in `text`, skipping separators like "$", ":".
fn first_number_after(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_digit() || bytes[i] == b',' || bytes[i] == b'.')
            {
                i += 1;
            }
            if let Some(v) = parse_number(&text[start..i]) {
                if v > PLAUSIBLE_MIN && v < PLAUSIBLE_MAX {
                    return Some(v);
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Parse "97,250.50" / "$97250" style numbers.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}
