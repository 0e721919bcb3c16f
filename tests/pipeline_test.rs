//! End-to-end pipeline scenarios with mock stage implementations.

use async_trait::async_trait;
use chrono::Utc;
use poolwatch::dispatcher::{DispatchError, Notifier};
use poolwatch::enricher::{EnrichOutcome, MarketEnricher};
use poolwatch::config::AppConfig;
use poolwatch::pipeline::{Coordinator, EventState};
use poolwatch::screener::{RiskScreener, ScreenOutcome};
use poolwatch::types::{MarketSnapshot, Pubkey, RawEventEnvelope, RiskVerdict};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

const WSOL: &str = "So11111111111111111111111111111111111111112";
const INIT_LOG: &str = "Program log: initialize2: InitializeInstruction2";

fn addr(prefix: &str) -> String {
    let mut s = prefix.to_string();
    while s.len() < 32 {
        s.push('x');
    }
    s
}

/// Build a stream notification for a new pool with the given pool account
/// and token mint.
fn envelope(seq: u64, pool: &str, mint: &str) -> RawEventEnvelope {
    let mut accounts: Vec<String> = (0..10).map(|_| addr("Filler")).collect();
    accounts[4] = addr(pool);
    accounts[8] = WSOL.to_string();
    accounts[9] = addr(mint);

    RawEventEnvelope {
        seq,
        payload: json!({
            "params": {
                "result": {
                    "context": { "slot": 100 + seq },
                    "value": {
                        "signature": "sig",
                        "logs": [INIT_LOG],
                        "accounts": accounts,
                        "blockTime": 1_700_000_000
                    }
                }
            }
        })
        .to_string(),
        received_at: Utc::now(),
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        ws_url: "wss://example.invalid".to_string(),
        notify_min_interval_secs: 0,
        ..AppConfig::default()
    }
}

/// Screener returning a fixed verdict, counting calls.
struct StaticScreener {
    calls: AtomicUsize,
    outcome: fn(&Pubkey) -> ScreenOutcome,
}

impl StaticScreener {
    fn passing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: |mint| {
                ScreenOutcome::Verdict(RiskVerdict {
                    mint: mint.clone(),
                    score: 0,
                    created_at_age_seconds: 10,
                    pump_fun: false,
                    passed: true,
                })
            },
        }
    }

    fn failing_score() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: |mint| {
                ScreenOutcome::Verdict(RiskVerdict {
                    mint: mint.clone(),
                    score: 50,
                    created_at_age_seconds: 10,
                    pump_fun: false,
                    passed: false,
                })
            },
        }
    }

    fn rejecting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: |mint| ScreenOutcome::Rejected {
                mint: mint.clone(),
                reason: "token flagged as rugged".to_string(),
            },
        }
    }

    fn unavailable() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: |mint| ScreenOutcome::Unavailable { mint: mint.clone() },
        }
    }
}

#[async_trait]
impl RiskScreener for StaticScreener {
    async fn screen(&self, mint: &Pubkey) -> ScreenOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)(mint)
    }
}

/// Screener that holds each call open for a while and records the peak
/// number of concurrent calls.
struct TrackingScreener {
    calls: AtomicUsize,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    hold: Duration,
}

impl TrackingScreener {
    fn new(hold: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            hold,
        }
    }
}

#[async_trait]
impl RiskScreener for TrackingScreener {
    async fn screen(&self, mint: &Pubkey) -> ScreenOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        ScreenOutcome::Verdict(RiskVerdict {
            mint: mint.clone(),
            score: 0,
            created_at_age_seconds: 5,
            pump_fun: false,
            passed: true,
        })
    }
}

enum EnrichMode {
    Snapshot,
    NotIndexed,
    ServiceError,
}

struct StaticEnricher {
    calls: AtomicUsize,
    mode: EnrichMode,
}

impl StaticEnricher {
    fn with(mode: EnrichMode) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            mode,
        }
    }
}

#[async_trait]
impl MarketEnricher for StaticEnricher {
    async fn enrich(&self, _mint: &Pubkey) -> EnrichOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            EnrichMode::Snapshot => EnrichOutcome::Snapshot(MarketSnapshot {
                pair_address: addr("Pair"),
                price_usd: 0.0042,
                liquidity_usd: 15_000.0,
                market_cap_usd: 120_000.0,
                pair_created_at: None,
                source_label: "raydium".to_string(),
                token_name: "Example".to_string(),
                token_symbol: "EXM".to_string(),
                socials: 1,
                pairs_available: 1,
            }),
            EnrichMode::NotIndexed => EnrichOutcome::NotIndexed,
            EnrichMode::ServiceError => {
                EnrichOutcome::ServiceError("market service returned status 500".to_string())
            }
        }
    }
}

struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    fn ok() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Status(502));
        }
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn coordinator(
    config: &AppConfig,
    screener: Arc<dyn RiskScreener>,
    enricher: Arc<dyn MarketEnricher>,
    notifier: Arc<dyn Notifier>,
) -> Coordinator {
    Coordinator::new(config, screener, enricher, notifier)
}

#[tokio::test]
async fn scenario_a_full_data_reaches_completed() {
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener, enricher, notifier.clone());

    let state = pipeline.handle_envelope(&envelope(1, "PondA", "MintA")).await;

    assert_eq!(state, EventState::Completed);
    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Example"));
    assert!(!messages[0].contains("Market data pending"));
}

#[tokio::test]
async fn scenario_b_duplicate_suppressed_before_screening() {
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener.clone(), enricher, notifier);

    let env = envelope(1, "PondB", "MintB");
    assert_eq!(pipeline.handle_envelope(&env).await, EventState::Completed);
    assert_eq!(pipeline.handle_envelope(&env).await, EventState::Suppressed);

    // The duplicate never reached the risk service.
    assert_eq!(screener.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_c_failed_risk_suppresses_before_enrichment() {
    let screener = Arc::new(StaticScreener::failing_score());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener, enricher.clone(), notifier.clone());

    let state = pipeline.handle_envelope(&envelope(1, "PondC", "MintC")).await;

    assert_eq!(state, EventState::Suppressed);
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
    assert!(notifier.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn rejected_screening_suppresses() {
    let screener = Arc::new(StaticScreener::rejecting());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener, enricher.clone(), notifier);

    let state = pipeline.handle_envelope(&envelope(1, "PondD", "MintD")).await;

    assert_eq!(state, EventState::Suppressed);
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unavailable_screening_suppresses() {
    let screener = Arc::new(StaticScreener::unavailable());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener, enricher.clone(), notifier);

    let state = pipeline.handle_envelope(&envelope(1, "PondE", "MintE")).await;

    assert_eq!(state, EventState::Suppressed);
    assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn not_indexed_enrichment_completes_with_partial_alert() {
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::NotIndexed));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener, enricher, notifier.clone());

    let state = pipeline.handle_envelope(&envelope(1, "PondF", "MintF")).await;

    assert_eq!(state, EventState::Completed);
    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Market data pending"));
}

#[tokio::test]
async fn market_service_error_suppresses_alert() {
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::ServiceError));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener, enricher, notifier.clone());

    let state = pipeline.handle_envelope(&envelope(1, "PondG", "MintG")).await;

    assert_eq!(state, EventState::Suppressed);
    assert!(notifier.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_dispatch_marks_event_failed() {
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::failing());
    let pipeline = coordinator(&test_config(), screener, enricher, notifier);

    let state = pipeline.handle_envelope(&envelope(1, "PondH", "MintH")).await;

    assert_eq!(state, EventState::Failed);
}

#[tokio::test]
async fn irrelevant_envelope_suppressed_without_screening() {
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&test_config(), screener.clone(), enricher, notifier);

    let env = RawEventEnvelope {
        seq: 9,
        payload: json!({
            "params": {
                "result": {
                    "context": { "slot": 1 },
                    "value": { "logs": ["Program log: Instruction: Transfer"] }
                }
            }
        })
        .to_string(),
        received_at: Utc::now(),
    };

    assert_eq!(pipeline.handle_envelope(&env).await, EventState::Suppressed);
    assert_eq!(screener.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dedup_key_expires_after_ttl() {
    let config = AppConfig {
        dedup_ttl_secs: 1,
        ..test_config()
    };
    let screener = Arc::new(StaticScreener::passing());
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::Snapshot));
    let notifier = Arc::new(RecordingNotifier::ok());
    let pipeline = coordinator(&config, screener.clone(), enricher, notifier);

    let env = envelope(1, "PondJ", "MintJ");
    assert_eq!(pipeline.handle_envelope(&env).await, EventState::Completed);
    assert_eq!(pipeline.handle_envelope(&env).await, EventState::Suppressed);

    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert_eq!(pipeline.handle_envelope(&env).await, EventState::Completed);
    assert_eq!(screener.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn busy_slots_defer_admission_of_new_envelopes() {
    let config = AppConfig {
        concurrency_limit: 1,
        ..test_config()
    };
    let screener = Arc::new(TrackingScreener::new(Duration::from_millis(150)));
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::NotIndexed));
    let notifier = Arc::new(RecordingNotifier::ok());
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let pipeline =
        coordinator(&config, screener, enricher, notifier).with_outcome_channel(outcome_tx);

    let (event_tx, event_rx) = broadcast::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(event_rx, shutdown_rx));

    event_tx.send(envelope(1, "PondK", "MintK")).expect("send");
    event_tx
        .send(RawEventEnvelope {
            seq: 2,
            payload: "not json".to_string(),
            received_at: Utc::now(),
        })
        .expect("send");

    // The second envelope only counts against the pipeline once the single
    // slot frees up, so its terminal report comes after the first event's.
    let first = outcome_rx.recv().await.expect("first outcome");
    assert_eq!((first.seq, first.state), (1, EventState::Completed));
    let second = outcome_rx.recv().await.expect("second outcome");
    assert_eq!((second.seq, second.state), (2, EventState::Suppressed));

    shutdown_tx.send(true).expect("signal shutdown");
    handle.await.expect("coordinator stops cleanly");
}

#[tokio::test]
async fn concurrency_limit_bounds_in_flight_events() {
    let config = AppConfig {
        concurrency_limit: 2,
        ..test_config()
    };
    let screener = Arc::new(TrackingScreener::new(Duration::from_millis(100)));
    let enricher = Arc::new(StaticEnricher::with(EnrichMode::NotIndexed));
    let notifier = Arc::new(RecordingNotifier::ok());
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let pipeline = coordinator(&config, screener.clone(), enricher, notifier)
        .with_outcome_channel(outcome_tx);

    let (event_tx, event_rx) = broadcast::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(event_rx, shutdown_rx));

    for i in 0..6u64 {
        let tag = char::from(b'A' + i as u8);
        event_tx
            .send(envelope(i + 1, &format!("Poo{tag}"), &format!("Min{tag}")))
            .expect("send envelope");
    }

    for _ in 0..6 {
        let outcome = outcome_rx.recv().await.expect("terminal outcome");
        assert_eq!(outcome.state, EventState::Completed);
    }

    assert_eq!(screener.calls.load(Ordering::SeqCst), 6);
    assert!(screener.max_concurrent.load(Ordering::SeqCst) <= 2);

    shutdown_tx.send(true).expect("signal shutdown");
    handle.await.expect("coordinator stops cleanly");
}
