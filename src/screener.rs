//! Risk screening against a rugcheck-style scoring service.
//!
//! One report request per mint, with a bounded number of retries at a fixed
//! interval for transient failures. A definitive rejection from the service
//! is terminal and never retried; exhausting the retry budget yields
//! `Unavailable`, which the coordinator treats as screening-failed without
//! declaring the token guilty.

use crate::config::{AppConfig, RetryPolicy};
use crate::types::{Pubkey, RiskVerdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{debug, instrument, warn};

/// Suffix carried by mints created through the pump.fun launchpad.
const PUMP_FUN_SUFFIX: &str = "pump";

/// Whether a mint was created through the pump.fun launchpad, recognizable
/// by its vanity address suffix.
pub fn is_pump_fun_mint(mint: &str) -> bool {
    mint.ends_with(PUMP_FUN_SUFFIX)
}

/// Terminal outcome of screening one mint.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenOutcome {
    /// The service produced a report; thresholds decide `verdict.passed`.
    Verdict(RiskVerdict),
    /// Definitive rejection: flagged token or report unavailable for a valid
    /// reason. Never retried.
    Rejected { mint: Pubkey, reason: String },
    /// Transient failures exhausted the retry budget; indeterminate, not
    /// guilty.
    Unavailable { mint: Pubkey },
}

/// Transient screening failures; retried up to the configured budget.
#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("risk service transport error: {0}")]
    Transport(String),
    #[error("risk service returned status {0}")]
    Status(u16),
    #[error("unexpected risk report shape: {0}")]
    BadReport(String),
}

#[async_trait]
pub trait RiskScreener: Send + Sync {
    async fn screen(&self, mint: &Pubkey) -> ScreenOutcome;
}

#[derive(Debug, Deserialize)]
struct RugReport {
    score: Option<u32>,
    rugged: Option<bool>,
    #[serde(rename = "detectedAt")]
    detected_at: Option<DateTime<Utc>>,
}

/// HTTP screener backed by the rugcheck report endpoint.
pub struct RugcheckScreener {
    http: Client,
    base_url: String,
    policy: RetryPolicy,
    max_score: u32,
    max_age_secs: u64,
    ignore_pump_fun: bool,
}

impl RugcheckScreener {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            base_url: config.rugcheck_base_url.clone(),
            policy: config.screener_retry.clone(),
            max_score: config.max_risk_score,
            max_age_secs: config.max_token_age_secs,
            ignore_pump_fun: config.ignore_pump_fun,
        }
    }

    /// One report fetch. `Ok` carries a terminal outcome (verdict or
    /// rejection); `Err` is transient and eligible for retry.
    async fn fetch_report(&self, mint: &Pubkey) -> Result<ScreenOutcome, ScreenError> {
        let url = format!("{}/v1/tokens/{}/report", self.base_url, mint);
        let response = self.http.get(&url).send().await.map_err(|e| {
            ScreenError::Transport(e.to_string())
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ScreenError::Status(status.as_u16()));
        }
        if status.is_client_error() {
            // The service looked at the mint and declined to report on it.
            return Ok(ScreenOutcome::Rejected {
                mint: mint.clone(),
                reason: format!("report unavailable (status {})", status.as_u16()),
            });
        }

        let report: RugReport = response
            .json()
            .await
            .map_err(|e| ScreenError::BadReport(e.to_string()))?;

        if report.rugged.unwrap_or(false) {
            return Ok(ScreenOutcome::Rejected {
                mint: mint.clone(),
                reason: "token flagged as rugged".to_string(),
            });
        }

        let score = report.score.unwrap_or(0);
        let age_seconds = report
            .detected_at
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0);
        let passed = score <= self.max_score && age_seconds <= self.max_age_secs;

        debug!(%mint, score, age_seconds, passed, "risk report evaluated");
        Ok(ScreenOutcome::Verdict(RiskVerdict {
            mint: mint.clone(),
            score,
            created_at_age_seconds: age_seconds,
            pump_fun: is_pump_fun_mint(mint),
            passed,
        }))
    }
}

#[async_trait]
impl RiskScreener for RugcheckScreener {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn screen(&self, mint: &Pubkey) -> ScreenOutcome {
        if self.ignore_pump_fun && is_pump_fun_mint(mint) {
            debug!(%mint, "pump.fun mint ignored by configuration");
            return ScreenOutcome::Rejected {
                mint: mint.clone(),
                reason: "pump.fun token ignored".to_string(),
            };
        }

        let strategy = FixedInterval::new(self.policy.delay()).take(self.policy.max_retries);

        match Retry::spawn(strategy, || self.fetch_report(mint)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%mint, error = %e, "risk screening unavailable after {} attempts", self.policy.max_attempts());
                ScreenOutcome::Unavailable { mint: mint.clone() }
            }
        }
    }
}
