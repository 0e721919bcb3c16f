//! Alert formatting and delivery to a Telegram chat.
//!
//! At-least-once delivery: transient failures are retried with backoff up to
//! a bounded attempt count, then the failure is surfaced as terminal for this
//! event. A stuck delivery never blocks the rest of the pipeline, and
//! delivery order is not guaranteed relative to detection order once retries
//! occur.

use crate::config::AppConfig;
use crate::types::EnrichedToken;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification transport error: {0}")]
    Transport(String),
    #[error("notification sink returned status {0}")]
    Status(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), DispatchError>;
}

/// Render the alert for an enriched token. The data-incomplete variant is
/// emitted when risk screening passed but the pair never got indexed within
/// the enricher's retry budget.
pub fn format_alert(token: &EnrichedToken, chain_id: &str) -> String {
    let mint = &token.event.base_mint;
    let mut lines = vec![
        "<b>[ Token Information ]</b>".to_string(),
        "🚀 New liquidity pool detected on Raydium".to_string(),
    ];

    match &token.market {
        Some(market) => {
            lines.push(format!(
                "📛 Token Name: {} Symbol: {}",
                market.token_name, market.token_symbol
            ));
            lines.push(format!("💹 Current Price: ${}", market.price_usd));
            lines.push(format!("📦 Current Mkt Cap: ${}", market.market_cap_usd));
            lines.push(format!("💦 Current Liquidity: ${}", market.liquidity_usd));
            let socials_icon = if market.socials == 0 { "🔴" } else { "🟢" };
            lines.push(format!(
                "{} This token has {} socials and {} pairs available",
                socials_icon, market.socials, market.pairs_available
            ));
            if let Some(created) = market.pair_created_at {
                lines.push(format!("🕒 Pair created at {}", created.to_rfc3339()));
            }
        }
        None => {
            lines.push(
                "⚠️ Market data pending: pair not indexed by the aggregator yet".to_string(),
            );
        }
    }

    lines.push(format!(
        "🛡 Risk score {} at {}s token age",
        token.verdict.score, token.verdict.created_at_age_seconds
    ));
    lines.push(format!(
        "🚀 Pumpfun token: {}",
        if token.verdict.pump_fun { "Yes" } else { "No" }
    ));
    lines.push(format!("🔗 Token Address: {mint}"));
    lines.push(format!(
        "👀 View on Dex https://dexscreener.com/{chain_id}/{mint}"
    ));
    lines.join("\n")
}

/// Telegram Bot API notifier with bounded retry and outbound pacing.
pub struct TelegramNotifier {
    http: Client,
    send_url: String,
    chat_id: String,
    max_retries: usize,
    backoff_base_ms: u64,
    limiter: DefaultDirectRateLimiter,
}

impl TelegramNotifier {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        let quota = Quota::with_period(Duration::from_secs(config.notify_min_interval_secs))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(u32::MAX).unwrap()));
        Self {
            http,
            send_url: format!(
                "{}/bot{}/sendMessage",
                config.telegram_api_base, config.telegram_bot_token
            ),
            chat_id: config.telegram_chat_id.clone(),
            max_retries: config.dispatcher_retry.max_retries,
            backoff_base_ms: config.dispatcher_retry.delay_ms,
            limiter: RateLimiter::direct(quota),
        }
    }

    async fn send_once(&self, text: &str) -> Result<(), DispatchError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let response = self
            .http
            .post(&self.send_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        debug!("notification delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, text))]
    async fn notify(&self, text: &str) -> Result<(), DispatchError> {
        // Pacing applies per notification, not per delivery attempt.
        self.limiter.until_ready().await;

        let strategy = ExponentialBackoff::from_millis(self.backoff_base_ms)
            .max_delay(Duration::from_secs(30))
            .take(self.max_retries);

        Retry::spawn(strategy, || self.send_once(text)).await
    }
}
