//! Prediction-market REST adapter: Gamma metadata + CLOB buy prices.
//!
//! The UP and DOWN legs are always independent requests; there is no
//! shared book object between sides, so one leg can never alias the
//! other.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use tracing::{debug, info};

use crate::config::PolymarketConfig;
use crate::types::{Direction, Market, SideOdds};

pub struct PolymarketClient {
    http: reqwest::Client,
    gamma_url: String,
    clob_url: String,
    slug: String,
    series_id: String,
    series_slug: String,
    auto_select_latest: bool,
}

impl PolymarketClient {
    pub fn new(cfg: &PolymarketConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            gamma_url: cfg.gamma_url.clone(),
            clob_url: cfg.clob_url.clone(),
            slug: cfg.slug.clone(),
            series_id: cfg.series_id.clone(),
            series_slug: cfg.series_slug.clone(),
            auto_select_latest: cfg.auto_select_latest,
        })
    }

    /// Fetch the market to trade: the configured slug, or the latest
    /// active market of the configured series.
    pub async fn fetch_market(&self) -> Result<Option<Market>> {
        if !self.slug.is_empty() {
            let url = format!("{}/markets?slug={}", self.gamma_url, self.slug);
            let raw: serde_json::Value = self.get_json(&url).await?;
            return Ok(raw
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(parse_gamma_market));
        }

        if !self.auto_select_latest {
            return Ok(None);
        }

        // Series ID takes precedence over the slug when both are set.
        let series_param = if self.series_id.is_empty() {
            format!("series_slug={}", self.series_slug)
        } else {
            format!("series_id={}", self.series_id)
        };
        let url = format!(
            "{}/markets?{}&active=true&closed=false&order=endDate&ascending=true&limit=5",
            self.gamma_url, series_param
        );
        let raw: serde_json::Value = self.get_json(&url).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Earliest end date still in the future = the live window.
        let market = raw
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(parse_gamma_market)
            .filter(|m| m.end_date_ms > now_ms)
            .min_by_key(|m| m.end_date_ms);

        if let Some(ref m) = market {
            debug!(slug = %m.slug, end_date_ms = m.end_date_ms, "Selected live market");
        }
        Ok(market)
    }

    /// Best buy-side price for one outcome token, in (0, 1).
    /// Endpoint: GET /price?token_id={id}&side=buy
    pub async fn buy_price(&self, token_id: &str) -> Result<Option<f64>> {
        let url = format!("{}/price?token_id={}&side=buy", self.clob_url, token_id);
        let raw: serde_json::Value = self.get_json(&url).await?;
        let price = raw
            .get("price")
            .and_then(|p| p.as_str())
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| *p > 0.0 && *p < 1.0);
        Ok(price)
    }

    /// Both sides' buy prices as two independent fetches. A failed or
    /// empty leg yields None for that side only.
    pub async fn fetch_odds(&self, market: &Market) -> SideOdds {
        let mut odds = SideOdds::default();
        for side in [Direction::Up, Direction::Down] {
            let Some(token) = market.token_for(side) else {
                continue;
            };
            match self.buy_price(token).await {
                Ok(price) => match side {
                    Direction::Up => odds.up = price,
                    Direction::Down => odds.down = price,
                },
                Err(e) => {
                    debug!(side = %side, error = %e, "Odds fetch failed");
                }
            }
        }
        odds
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;
        if !response.status().is_success() {
            bail!("Endpoint returned {}: {}", response.status(), url);
        }
        response.json().await.context("Response was not JSON")
    }
}

/// Parse one Gamma market record into our Market type.
fn parse_gamma_market(json: &serde_json::Value) -> Option<Market> {
    let obj = json.as_object()?;
    let slug = obj.get("slug")?.as_str()?.to_string();
    let question = obj
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or_default()
        .to_string();

    let end_date_ms = obj
        .get("endDate")
        .and_then(|d| d.as_str())
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.timestamp_millis())?;

    // Gamma double-encodes arrays as JSON strings.
    let outcomes = parse_string_array(obj.get("outcomes"))?;
    let clob_token_ids = parse_string_array(obj.get("clobTokenIds"))?;
    if clob_token_ids.len() < 2 {
        info!(slug = %slug, "Market has fewer than two outcome tokens, skipping");
        return None;
    }

    Some(Market {
        slug,
        question,
        outcomes,
        clob_token_ids,
        end_date_ms,
        metadata: obj.clone(),
    })
}

fn parse_string_array(value: Option<&serde_json::Value>) -> Option<Vec<String>> {
    match value? {
        serde_json::Value::Array(arr) => Some(
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        serde_json::Value::String(s) => {
            let inner: Vec<String> = serde_json::from_str(s).ok()?;
            Some(inner)
        }
        _ => None,
    }
}
