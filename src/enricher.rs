//! Market data enrichment from a DexScreener-style aggregator.
//!
//! The most retry-sensitive stage: pools that were created seconds ago are
//! usually not indexed yet, so "no matching pair" is the expected response
//! shape and is polled on a fixed schedule rather than treated as absence.
//! Only after the schedule is exhausted does the stage return a terminal
//! outcome, and it keeps `NotIndexed` distinct from a genuine service
//! failure.

use crate::config::{AppConfig, RetryPolicy};
use crate::types::{MarketSnapshot, Pubkey};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Terminal outcome of enriching one token.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichOutcome {
    Snapshot(MarketSnapshot),
    /// The aggregator never produced a matching pair within the retry budget.
    /// The coordinator may still emit a data-incomplete alert.
    NotIndexed,
    /// The aggregator itself failed; suppresses the alert and is logged for
    /// operator attention.
    ServiceError(String),
}

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("market service transport error: {0}")]
    Transport(String),
    #[error("market service returned status {0}")]
    Status(u16),
    #[error("unexpected market payload shape: {0}")]
    BadPayload(String),
}

#[async_trait]
pub trait MarketEnricher: Send + Sync {
    async fn enrich(&self, mint: &Pubkey) -> EnrichOutcome;
}

#[derive(Debug, Deserialize)]
struct TokenPairsResponse {
    #[serde(default)]
    pairs: Vec<PairInfo>,
}

#[derive(Debug, Deserialize)]
struct PairInfo {
    #[serde(rename = "dexId")]
    dex_id: Option<String>,
    #[serde(rename = "pairAddress")]
    pair_address: Option<String>,
    #[serde(rename = "baseToken")]
    base_token: Option<BaseToken>,
    /// Served as a decimal string by the aggregator, occasionally as a number
    #[serde(rename = "priceUsd", default, deserialize_with = "flexible_f64")]
    price_usd: Option<f64>,
    liquidity: Option<Liquidity>,
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
    /// Unix milliseconds
    #[serde(rename = "pairCreatedAt")]
    pair_created_at: Option<i64>,
    info: Option<PairExtra>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Liquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PairExtra {
    #[serde(default)]
    socials: Vec<serde_json::Value>,
}

fn flexible_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// HTTP enricher backed by the aggregator's token-pairs endpoint.
pub struct DexScreenerEnricher {
    http: Client,
    base_url: String,
    chain_id: String,
    dex_label: String,
    policy: RetryPolicy,
}

impl DexScreenerEnricher {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            base_url: config.dexscreener_base_url.clone(),
            chain_id: config.chain_id.clone(),
            dex_label: config.dex_label.clone(),
            policy: config.enricher_retry.clone(),
        }
    }

    /// One aggregator fetch. `Ok(None)` means no pair matched the DEX label
    /// yet, which is expected shortly after pool creation.
    async fn fetch_pair(&self, mint: &Pubkey) -> Result<Option<MarketSnapshot>, EnrichError> {
        let url = format!("{}/tokens/v1/{}/{}", self.base_url, self.chain_id, mint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EnrichError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Status(status.as_u16()));
        }

        let payload: TokenPairsResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::BadPayload(e.to_string()))?;

        let pairs_available = payload.pairs.len();
        let matched = payload
            .pairs
            .into_iter()
            .find(|p| p.dex_id.as_deref() == Some(self.dex_label.as_str()));

        Ok(matched.map(|pair| {
            let base = pair.base_token.unwrap_or(BaseToken {
                name: None,
                symbol: None,
            });
            MarketSnapshot {
                pair_address: pair.pair_address.unwrap_or_else(|| mint.clone()),
                price_usd: pair.price_usd.unwrap_or(0.0),
                liquidity_usd: pair.liquidity.and_then(|l| l.usd).unwrap_or(0.0),
                market_cap_usd: pair.market_cap.unwrap_or(0.0),
                pair_created_at: pair
                    .pair_created_at
                    .and_then(DateTime::from_timestamp_millis),
                source_label: self.dex_label.clone(),
                token_name: base.name.unwrap_or_else(|| mint.clone()),
                token_symbol: base.symbol.unwrap_or_else(|| "N/A".to_string()),
                socials: pair.info.map(|i| i.socials.len()).unwrap_or(0),
                pairs_available,
            }
        }))
    }
}

#[async_trait]
impl MarketEnricher for DexScreenerEnricher {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn enrich(&self, mint: &Pubkey) -> EnrichOutcome {
        let attempts = self.policy.max_attempts();
        let mut last_error: Option<EnrichError> = None;

        for attempt in 1..=attempts {
            match self.fetch_pair(mint).await {
                Ok(Some(snapshot)) => {
                    debug!(%mint, attempt, "market snapshot obtained");
                    return EnrichOutcome::Snapshot(snapshot);
                }
                Ok(None) => {
                    debug!(%mint, attempt, attempts, "pair not indexed yet");
                    last_error = None;
                }
                Err(e) => {
                    warn!(%mint, attempt, attempts, error = %e, "market fetch failed");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.policy.delay()).await;
            }
        }

        // The kind of the final attempt decides the terminal outcome: an
        // unindexed pair is expected absence, a failing service is not.
        match last_error {
            None => EnrichOutcome::NotIndexed,
            Some(e) => EnrichOutcome::ServiceError(e.to_string()),
        }
    }
}
