//! Pipeline coordinator: wires decoder, screener, enricher and dispatcher
//! together and owns all cross-stage state.
//!
//! Per event the coordinator drives the state machine
//! `Detected -> Decoded -> Screening -> Enriching -> Dispatching ->
//! {Completed, Suppressed, Failed}`. Screening and enriching run
//! sequentially for a single event (risk must pass before market lookups
//! spend their retry budget), while distinct events run concurrently up to
//! the configured limit. The dedup cache and the in-flight task set are the
//! only cross-stage state, and both live here.

use crate::config::AppConfig;
use crate::decoder::{DecodeError, PoolDecoder};
use crate::dispatcher::{format_alert, Notifier};
use crate::enricher::{EnrichOutcome, MarketEnricher};
use crate::screener::{RiskScreener, ScreenOutcome};
use crate::types::{EnrichedToken, PoolCreationEvent, Pubkey, RawEventEnvelope};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, trace, warn};

/// Per-event pipeline state. Events terminate in `Completed`, `Suppressed`
/// or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Detected,
    Decoded,
    Screening,
    Enriching,
    Dispatching,
    Completed,
    Suppressed,
    Failed,
}

/// Terminal state report for one envelope, keyed by its sequence number.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    pub seq: u64,
    pub state: EventState,
}

pub struct Coordinator {
    decoder: PoolDecoder,
    screener: Arc<dyn RiskScreener>,
    enricher: Arc<dyn MarketEnricher>,
    notifier: Arc<dyn Notifier>,
    chain_id: String,
    /// Recently-seen dedup keys with TTL eviction. Inserted on first
    /// sighting; duplicates within the window never reach screening.
    seen: Cache<Pubkey, ()>,
    semaphore: Arc<Semaphore>,
    shutdown_grace: Duration,
    outcome_tx: Option<mpsc::UnboundedSender<EventOutcome>>,
}

impl Coordinator {
    pub fn new(
        config: &AppConfig,
        screener: Arc<dyn RiskScreener>,
        enricher: Arc<dyn MarketEnricher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let seen = Cache::builder()
            .max_capacity(config.dedup_capacity)
            .time_to_live(config.dedup_ttl())
            .build();

        Self {
            decoder: PoolDecoder::new(config.wsol_mint.clone()),
            screener,
            enricher,
            notifier,
            chain_id: config.chain_id.clone(),
            seen,
            semaphore: Arc::new(Semaphore::new(config.concurrency_limit)),
            shutdown_grace: config.shutdown_grace(),
            outcome_tx: None,
        }
    }

    /// Report terminal states on a channel, mainly for observation in tests
    /// and operator tooling.
    pub fn with_outcome_channel(mut self, tx: mpsc::UnboundedSender<EventOutcome>) -> Self {
        self.outcome_tx = Some(tx);
        self
    }

    /// Main accept loop. Consumes envelopes until the stream closes or
    /// shutdown is signalled, then drains in-flight events within the grace
    /// period.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<RawEventEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        info!("pipeline coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, no longer accepting envelopes");
                    break;
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                received = events.recv() => match received {
                    Ok(envelope) => {
                        // A permit is taken before the envelope leaves the
                        // raw stream, so at most `concurrency_limit` events
                        // sit past detection. Waiting here stalls the accept
                        // loop while the broadcast buffer absorbs (and
                        // eventually drops the oldest) envelopes.
                        let permit = match self.semaphore.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let Some(event) = self.admit(&envelope).await else {
                            continue;
                        };

                        let screener = self.screener.clone();
                        let enricher = self.enricher.clone();
                        let notifier = self.notifier.clone();
                        let chain_id = self.chain_id.clone();
                        let outcome_tx = self.outcome_tx.clone();
                        let seq = envelope.seq;
                        tasks.spawn(async move {
                            let state =
                                Self::process(screener, enricher, notifier, &chain_id, event)
                                    .await;
                            if let Some(tx) = outcome_tx {
                                let _ = tx.send(EventOutcome { seq, state });
                            }
                            drop(permit);
                        });
                    }
                    Err(RecvError::Lagged(dropped)) => {
                        warn!(dropped, "event buffer full, oldest envelopes dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("event stream closed");
                        break;
                    }
                },
            }
        }

        self.drain(tasks).await;
        info!("pipeline coordinator stopped");
    }

    /// Decode and dedup-check one envelope, without spawning. Returns the
    /// event when it should proceed to screening.
    async fn admit(&self, envelope: &RawEventEnvelope) -> Option<PoolCreationEvent> {
        match self.decoder.decode(envelope) {
            Ok(event) => {
                let key = event.dedup_key().clone();
                if self.seen.contains_key(&key) {
                    debug!(%key, seq = envelope.seq, "duplicate within dedup window, suppressed");
                    self.report(envelope.seq, EventState::Suppressed);
                    return None;
                }
                self.seen.insert(key, ()).await;
                Some(event)
            }
            Err(DecodeError::NotMatched) => {
                trace!(seq = envelope.seq, "envelope is not a pool initialization");
                self.report(envelope.seq, EventState::Suppressed);
                None
            }
            Err(e) => {
                warn!(seq = envelope.seq, error = %e, "dropping undecodable envelope");
                self.report(envelope.seq, EventState::Suppressed);
                None
            }
        }
    }

    /// Drive one admitted event through screening, enrichment and dispatch.
    #[instrument(skip_all, fields(mint = %event.base_mint))]
    async fn process(
        screener: Arc<dyn RiskScreener>,
        enricher: Arc<dyn MarketEnricher>,
        notifier: Arc<dyn Notifier>,
        chain_id: &str,
        event: PoolCreationEvent,
    ) -> EventState {
        let pool = event.dedup_key().clone();
        info!(%pool, slot = event.source_slot, "new liquidity pool detected");

        let verdict = match screener.screen(&event.base_mint).await {
            ScreenOutcome::Verdict(v) if v.passed => v,
            ScreenOutcome::Verdict(v) => {
                info!(%pool, score = v.score, age = v.created_at_age_seconds, "risk thresholds not met, suppressed");
                return EventState::Suppressed;
            }
            ScreenOutcome::Rejected { reason, .. } => {
                info!(%pool, %reason, "risk screening rejected, suppressed");
                return EventState::Suppressed;
            }
            ScreenOutcome::Unavailable { .. } => {
                warn!(%pool, "risk screening indeterminate, token not promoted");
                return EventState::Suppressed;
            }
        };

        let market = match enricher.enrich(&event.base_mint).await {
            EnrichOutcome::Snapshot(snapshot) => Some(snapshot),
            EnrichOutcome::NotIndexed => {
                info!(%pool, "market data not indexed in time, dispatching partial alert");
                None
            }
            EnrichOutcome::ServiceError(e) => {
                error!(%pool, error = %e, "market data service failure, alert suppressed");
                return EventState::Suppressed;
            }
        };

        let token = EnrichedToken {
            event,
            verdict,
            market,
        };
        let text = format_alert(&token, chain_id);
        match notifier.notify(&text).await {
            Ok(()) => {
                info!(%pool, complete = token.data_complete(), "alert dispatched");
                EventState::Completed
            }
            Err(e) => {
                error!(%pool, error = %e, "alert delivery exhausted retries");
                EventState::Failed
            }
        }
    }

    /// Process one envelope inline, bypassing the concurrency machinery.
    /// Used by tests and by one-shot tooling.
    pub async fn handle_envelope(&self, envelope: &RawEventEnvelope) -> EventState {
        let Some(event) = self.admit(envelope).await else {
            return EventState::Suppressed;
        };
        let state = Self::process(
            self.screener.clone(),
            self.enricher.clone(),
            self.notifier.clone(),
            &self.chain_id,
            event,
        )
        .await;
        self.report(envelope.seq, state);
        state
    }

    fn report(&self, seq: u64, state: EventState) {
        if let Some(tx) = &self.outcome_tx {
            let _ = tx.send(EventOutcome { seq, state });
        }
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        info!(in_flight = tasks.len(), "waiting for in-flight events");
        let deadline = tokio::time::sleep(self.shutdown_grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(aborted = tasks.len(), "shutdown grace elapsed, aborting in-flight events");
                    tasks.abort_all();
                    break;
                }
                joined = tasks.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
            }
        }
    }
}
