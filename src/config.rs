//! Runtime configuration for the poolwatch pipeline.
//!
//! A single `AppConfig` is constructed once at startup (from the environment,
//! with `Default` carrying sensible values) and handed into each component.
//! There are no process-wide mutable singletons; components receive the
//! scalars they need at construction time.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Raydium AMM v4 program id on mainnet.
pub const DEFAULT_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

/// Wrapped SOL mint, the reference side of every recognized pair.
pub const DEFAULT_WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Bounded retry policy for a single pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a stage makes `max_retries + 1`
    /// attempts in total.
    pub max_retries: usize,
    /// Delay between attempts, in milliseconds
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, delay_ms: u64) -> Self {
        Self {
            max_retries,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Total attempts including the initial one.
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WebSocket endpoint for the log subscription
    pub ws_url: String,
    /// Program id whose logs are subscribed to
    pub program_id: String,
    /// Reference mint used to recognize pairs
    pub wsol_mint: String,

    /// Base URL of the risk scoring service
    pub rugcheck_base_url: String,
    /// Base URL of the market data aggregator
    pub dexscreener_base_url: String,
    /// Chain identifier used in aggregator requests and alert links
    pub chain_id: String,
    /// DEX label a pair must carry to be matched
    pub dex_label: String,

    /// Base URL of the Telegram Bot API
    pub telegram_api_base: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,

    pub screener_retry: RetryPolicy,
    pub enricher_retry: RetryPolicy,
    pub dispatcher_retry: RetryPolicy,

    /// Maximum acceptable risk score (inclusive)
    pub max_risk_score: u32,
    /// Maximum acceptable token age in seconds (inclusive)
    pub max_token_age_secs: u64,
    /// Reject pump.fun mints outright instead of screening them
    pub ignore_pump_fun: bool,

    /// Maximum events processed concurrently
    pub concurrency_limit: usize,
    /// Time-to-live of dedup keys, in seconds
    pub dedup_ttl_secs: u64,
    /// Maximum dedup keys retained
    pub dedup_capacity: u64,
    /// Capacity of the envelope buffer between adapter and coordinator
    pub event_buffer: usize,
    /// Minimum interval between outbound notifications, in seconds
    pub notify_min_interval_secs: u64,
    /// How long in-flight events may finish after shutdown, in seconds
    pub shutdown_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            program_id: DEFAULT_PROGRAM_ID.to_string(),
            wsol_mint: DEFAULT_WSOL_MINT.to_string(),
            rugcheck_base_url: "https://api.rugcheck.xyz".to_string(),
            dexscreener_base_url: "https://api.dexscreener.com".to_string(),
            chain_id: "solana".to_string(),
            dex_label: "raydium".to_string(),
            telegram_api_base: "https://api.telegram.org".to_string(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            screener_retry: RetryPolicy::new(3, 2_000),
            enricher_retry: RetryPolicy::new(9, 5_000),
            dispatcher_retry: RetryPolicy::new(3, 500),
            max_risk_score: 0,
            max_token_age_secs: 86_400,
            ignore_pump_fun: false,
            concurrency_limit: 8,
            dedup_ttl_secs: 3_600,
            dedup_capacity: 10_000,
            event_buffer: 512,
            notify_min_interval_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// everything but the stream URL and Telegram credentials.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            ws_url: required("HELIUS_WS_URI")?,
            program_id: var_or("RAYDIUM_PROGRAM_ID", &defaults.program_id),
            wsol_mint: var_or("WSOL_PC_MINT", &defaults.wsol_mint),
            rugcheck_base_url: var_or("RUGCHECK_BASE_URL", &defaults.rugcheck_base_url),
            dexscreener_base_url: var_or("DEXSCREENER_BASE_URL", &defaults.dexscreener_base_url),
            chain_id: var_or("CHAIN_ID", &defaults.chain_id),
            dex_label: var_or("DEX_PAIR_FILTER", &defaults.dex_label),
            telegram_api_base: var_or("TELEGRAM_API_BASE", &defaults.telegram_api_base),
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?,
            telegram_chat_id: required("TELEGRAM_CHAT_ID")?,
            screener_retry: RetryPolicy::new(
                parse_or("RUG_CHECK_MAX_RETRIES", defaults.screener_retry.max_retries)?,
                parse_or("RUG_CHECK_RETRY_DELAY_MS", defaults.screener_retry.delay_ms)?,
            ),
            enricher_retry: RetryPolicy::new(
                parse_or("DEXSCREENER_MAX_RETRIES", defaults.enricher_retry.max_retries)?,
                parse_or(
                    "DEXSCREENER_RETRY_DELAY_MS",
                    defaults.enricher_retry.delay_ms,
                )?,
            ),
            dispatcher_retry: RetryPolicy::new(
                parse_or("TELEGRAM_MAX_RETRIES", defaults.dispatcher_retry.max_retries)?,
                parse_or("TELEGRAM_RETRY_DELAY_MS", defaults.dispatcher_retry.delay_ms)?,
            ),
            max_risk_score: parse_or("RUG_CHECK_MAX_SCORE", defaults.max_risk_score)?,
            max_token_age_secs: parse_or("MAX_TOKEN_AGE_SECS", defaults.max_token_age_secs)?,
            ignore_pump_fun: parse_or("IGNORE_PUMP_FUN", defaults.ignore_pump_fun)?,
            concurrency_limit: parse_or("CONCURRENCY_LIMIT", defaults.concurrency_limit)?,
            dedup_ttl_secs: parse_or("DEDUP_TTL_SECS", defaults.dedup_ttl_secs)?,
            dedup_capacity: parse_or("DEDUP_CAPACITY", defaults.dedup_capacity)?,
            event_buffer: parse_or("EVENT_BUFFER", defaults.event_buffer)?,
            notify_min_interval_secs: parse_or(
                "NOTIFY_MIN_INTERVAL_SECS",
                defaults.notify_min_interval_secs,
            )?,
            shutdown_grace_secs: parse_or("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            bail!("CONCURRENCY_LIMIT must be at least 1");
        }
        if self.event_buffer == 0 {
            bail!("EVENT_BUFFER must be at least 1");
        }
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            bail!("HELIUS_WS_URI must be a ws:// or wss:// URL");
        }
        Ok(())
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn required(key: &str) -> Result<String> {
    let value = std::env::var(key)
        .with_context(|| format!("missing required environment variable {key}"))?;
    if value.trim().is_empty() {
        bail!("environment variable {key} is set but empty");
    }
    Ok(value)
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policies() {
        let config = AppConfig::default();

        assert_eq!(config.program_id, DEFAULT_PROGRAM_ID);
        assert_eq!(config.wsol_mint, DEFAULT_WSOL_MINT);
        assert_eq!(config.enricher_retry.max_attempts(), 10);
        assert_eq!(config.enricher_retry.delay(), Duration::from_secs(5));
        assert_eq!(config.max_risk_score, 0);
        assert_eq!(config.dex_label, "raydium");
    }

    #[test]
    fn retry_policy_attempt_count() {
        let policy = RetryPolicy::new(2, 100);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_millis(100));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = AppConfig {
            ws_url: "wss://example.invalid".to_string(),
            concurrency_limit: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_websocket_url() {
        let config = AppConfig {
            ws_url: "https://example.invalid".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
