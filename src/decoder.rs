//! Decoding of raw log notifications into pool creation events.
//!
//! Decoding is a pure function of the envelope: no I/O, no retry. The common
//! case is an irrelevant notification (`NotMatched`); actual decode failures
//! are logged by the coordinator and the envelope is dropped.

use crate::types::{PoolCreationEvent, Pubkey, RawEventEnvelope};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Log line emitted by the AMM program when a new pool is initialized.
const INITIALIZE_LOG_MARKER: &str = "Program log: initialize2: InitializeInstruction2";

/// Account positions inside the matched initialize instruction.
const POOL_ACCOUNT_INDEX: usize = 4;
const COIN_MINT_INDEX: usize = 8;
const PC_MINT_INDEX: usize = 9;
const MIN_ACCOUNTS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The envelope is valid but not a pool initialization. This is the
    /// common case and is suppressed silently.
    #[error("envelope does not match a pool initialization")]
    NotMatched,
    #[error("malformed envelope payload: {0}")]
    Malformed(String),
    #[error("missing field `{0}` in envelope")]
    MissingField(&'static str),
    #[error("invalid address `{0}`")]
    InvalidAddress(String),
    /// Neither or both sides of the pair equal the reference mint.
    #[error("pair does not include exactly one reference mint")]
    UnrecognizedPair,
}

#[derive(Debug, Deserialize)]
struct LogsNotification {
    params: Option<NotificationParams>,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: Option<NotificationResult>,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    context: Option<SlotContext>,
    value: Option<LogsValue>,
}

#[derive(Debug, Deserialize)]
struct SlotContext {
    slot: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LogsValue {
    logs: Option<Vec<String>>,
    accounts: Option<Vec<String>>,
    #[serde(rename = "blockTime")]
    block_time: Option<i64>,
}

/// Stateless decoder for pool initialization notifications.
#[derive(Debug, Clone)]
pub struct PoolDecoder {
    wsol_mint: Pubkey,
}

impl PoolDecoder {
    pub fn new(wsol_mint: impl Into<Pubkey>) -> Self {
        Self {
            wsol_mint: wsol_mint.into(),
        }
    }

    /// Decode one envelope. Deterministic and side-effect-free: the same
    /// envelope always yields the same event or the same error.
    pub fn decode(&self, envelope: &RawEventEnvelope) -> Result<PoolCreationEvent, DecodeError> {
        let notification: LogsNotification = serde_json::from_str(&envelope.payload)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        // Subscription acks and RPC errors carry no params; they are noise,
        // not failures.
        let result = notification
            .params
            .and_then(|p| p.result)
            .ok_or(DecodeError::NotMatched)?;
        let value = result.value.ok_or(DecodeError::NotMatched)?;

        let logs = value.logs.ok_or(DecodeError::NotMatched)?;
        if !logs.iter().any(|l| l.contains(INITIALIZE_LOG_MARKER)) {
            return Err(DecodeError::NotMatched);
        }

        let slot = result
            .context
            .and_then(|c| c.slot)
            .ok_or(DecodeError::MissingField("slot"))?;

        let accounts = value.accounts.ok_or(DecodeError::MissingField("accounts"))?;
        if accounts.len() < MIN_ACCOUNTS {
            return Err(DecodeError::MissingField("accounts"));
        }

        let pool_address = validated(&accounts[POOL_ACCOUNT_INDEX])?;
        let coin_mint = validated(&accounts[COIN_MINT_INDEX])?;
        let pc_mint = validated(&accounts[PC_MINT_INDEX])?;

        let (base_mint, quote_mint) =
            match (coin_mint == self.wsol_mint, pc_mint == self.wsol_mint) {
                (true, false) => (pc_mint, coin_mint),
                (false, true) => (coin_mint, pc_mint),
                _ => return Err(DecodeError::UnrecognizedPair),
            };

        let creation_timestamp = value
            .block_time
            .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
            .unwrap_or(envelope.received_at);

        Ok(PoolCreationEvent {
            pool_address,
            base_mint,
            quote_mint,
            creation_timestamp,
            source_slot: slot,
        })
    }
}

/// Base58 sanity check: correct length and alphabet. Full curve validation is
/// left to the downstream services that resolve the address.
fn validated(address: &str) -> Result<Pubkey, DecodeError> {
    let valid_length = (32..=44).contains(&address.len());
    let valid_alphabet = address
        .chars()
        .all(|c| c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l'));
    if valid_length && valid_alphabet {
        Ok(address.to_string())
    } else {
        Err(DecodeError::InvalidAddress(address.to_string()))
    }
}
