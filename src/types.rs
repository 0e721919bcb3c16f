//! Core types and data structures for the poolwatch pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A simple public key representation (base58 string, avoids pulling in the full Solana SDK)
pub type Pubkey = String;

/// A raw log notification as received from the event stream, before decoding.
///
/// Owned solely by the event source adapter until handed to the decoder.
#[derive(Debug, Clone)]
pub struct RawEventEnvelope {
    /// Monotonic sequence number assigned by the adapter
    pub seq: u64,
    /// Raw JSON payload of the stream notification
    pub payload: String,
    /// When the adapter received the notification
    pub received_at: DateTime<Utc>,
}

/// A newly created liquidity pool, decoded from a raw envelope.
///
/// Immutable once produced. `quote_mint` is always the reference (WSOL) mint
/// and `base_mint` the newly pooled token, so `base_mint != quote_mint` holds
/// by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCreationEvent {
    /// The AMM pool account address
    pub pool_address: Pubkey,
    /// The newly pooled token mint
    pub base_mint: Pubkey,
    /// The reference mint (wrapped native token)
    pub quote_mint: Pubkey,
    /// Block time of the creating transaction, or receive time when absent
    pub creation_timestamp: DateTime<Utc>,
    /// Slot in which the creation was observed
    pub source_slot: u64,
}

impl PoolCreationEvent {
    /// Key under which this event is deduplicated. Falls back to the base
    /// mint when the pool address is unavailable.
    pub fn dedup_key(&self) -> &Pubkey {
        if self.pool_address.is_empty() {
            &self.base_mint
        } else {
            &self.pool_address
        }
    }
}

/// Result of risk screening a token mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    /// The screened mint
    pub mint: Pubkey,
    /// Risk score reported by the screening service (higher is worse)
    pub score: u32,
    /// Seconds since the service first saw the token
    pub created_at_age_seconds: u64,
    /// Whether the mint carries the pump.fun suffix
    pub pump_fun: bool,
    /// Whether score and age are within the configured thresholds
    pub passed: bool,
}

/// Market data for a trading pair, as reported by the aggregator.
///
/// Absence of a snapshot is always the explicit `NotIndexed` outcome of the
/// enricher, never a zeroed placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Address of the matched pair
    pub pair_address: Pubkey,
    pub price_usd: f64,
    pub liquidity_usd: f64,
    pub market_cap_usd: f64,
    /// When the aggregator saw the pair created, if reported
    pub pair_created_at: Option<DateTime<Utc>>,
    /// DEX label the pair was matched on (e.g. "raydium")
    pub source_label: String,
    pub token_name: String,
    pub token_symbol: String,
    /// Number of social links attached to the pair listing
    pub socials: usize,
    /// Total pairs the aggregator knows for this token
    pub pairs_available: usize,
}

/// Aggregate handed to the dispatcher (and to any external analysis
/// collaborator) once screening and enrichment both reached a terminal result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedToken {
    pub event: PoolCreationEvent,
    pub verdict: RiskVerdict,
    /// `None` when market data was not indexed within the retry budget
    pub market: Option<MarketSnapshot>,
}

impl EnrichedToken {
    /// Whether the market leg of enrichment produced data.
    pub fn data_complete(&self) -> bool {
        self.market.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pool: &str, base: &str) -> PoolCreationEvent {
        PoolCreationEvent {
            pool_address: pool.to_string(),
            base_mint: base.to_string(),
            quote_mint: "So11111111111111111111111111111111111111112".to_string(),
            creation_timestamp: Utc::now(),
            source_slot: 1,
        }
    }

    #[test]
    fn dedup_key_prefers_pool_address() {
        let ev = event("PoolAddr", "BaseMint");
        assert_eq!(ev.dedup_key(), "PoolAddr");
    }

    #[test]
    fn dedup_key_falls_back_to_base_mint() {
        let ev = event("", "BaseMint");
        assert_eq!(ev.dedup_key(), "BaseMint");
    }

    #[test]
    fn data_complete_reflects_market_presence() {
        let token = EnrichedToken {
            event: event("PoolAddr", "BaseMint"),
            verdict: RiskVerdict {
                mint: "BaseMint".to_string(),
                score: 0,
                created_at_age_seconds: 10,
                pump_fun: false,
                passed: true,
            },
            market: None,
        };
        assert!(!token.data_complete());
    }
}
