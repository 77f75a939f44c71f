//! Optional Discord webhook notifications for trade opens/closes.
//!
//! Fire-and-forget: each notification is a spawned task with its own
//! deadline, and failures are warnings. An empty webhook URL disables
//! the notifier entirely.

use std::time::Duration;

use tracing::warn;

use crate::paper::{CloseEvent, OpenEvent};

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: &str) -> Self {
        let webhook_url = if webhook_url.is_empty() {
            None
        } else {
            Some(webhook_url.to_string())
        };
        Self {
            webhook_url,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn notify_open(&self, event: &OpenEvent) {
        self.post(format!(
            "📈 Opened {} {} @ {:.2} on `{}` (stake ${:.2}, fee ${:.2})",
            event.side, event.strategy, event.price, event.market_slug, event.stake, event.fee
        ));
    }

    pub fn notify_close(&self, event: &CloseEvent) {
        let emoji = if event.pnl >= 0.0 { "✅" } else { "❌" };
        self.post(format!(
            "{emoji} Closed {} {} @ {:.2} on `{}` [{}] pnl ${:+.2}, balance ${:.2}",
            event.side,
            event.strategy,
            event.exit_price,
            event.market_slug,
            event.reason,
            event.pnl,
            event.balance_after
        ));
    }

    fn post(&self, content: String) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let http = self.http.clone();
        tokio::spawn(async move {
            let body = serde_json::json!({ "content": content });
            if let Err(e) = http.post(&url).json(&body).send().await {
                warn!(error = %e, "Discord notification failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, StrategyTag};

    #[test]
    fn empty_url_disables_notifier() {
        let notifier = DiscordNotifier::new("");
        assert!(notifier.webhook_url.is_none());
        // Posting without a URL must be a no-op even outside a runtime.
        notifier.notify_open(&OpenEvent {
            ts_ms: 0,
            market_slug: "btc-15m-a".into(),
            side: Direction::Up,
            strategy: StrategyTag::Momentum,
            price: 0.6,
            stake: 5.0,
            fee: 0.07,
            shares: 8.3,
            balance_after: 94.9,
            reason: "test".into(),
        });
    }
}
