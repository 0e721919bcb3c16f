//! poolwatch - real-time liquidity pool detection and alerting for Solana.
//!
//! This crate implements an event-ingestion pipeline: a WebSocket log
//! subscription detects newly created Raydium pools, each detection is
//! screened against a risk-scoring service and enriched with market data,
//! and a deduplicated, rate-limited Telegram alert is emitted once
//! enrichment succeeds or definitively fails.

pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod enricher;
pub mod listener;
pub mod pipeline;
pub mod screener;
pub mod types;

// Re-export main types for convenience
pub use pipeline::{Coordinator, EventOutcome, EventState};
pub use types::{EnrichedToken, MarketSnapshot, PoolCreationEvent, RawEventEnvelope, RiskVerdict};
