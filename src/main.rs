//! poolwatch binary: wires the detection pipeline together and runs it
//! until Ctrl-C or a fatal event-stream error.

use anyhow::Result;
use poolwatch::config::AppConfig;
use poolwatch::dispatcher::TelegramNotifier;
use poolwatch::enricher::DexScreenerEnricher;
use poolwatch::listener::EventListener;
use poolwatch::pipeline::Coordinator;
use poolwatch::screener::RugcheckScreener;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config = AppConfig::from_env()?;
    info!(program = %config.program_id, "starting poolwatch pipeline");

    let http = Client::builder().timeout(Duration::from_secs(10)).build()?;

    let (event_tx, event_rx) = broadcast::channel(config.event_buffer);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = EventListener::new(
        config.ws_url.clone(),
        config.program_id.clone(),
        event_tx,
    );
    let screener = Arc::new(RugcheckScreener::new(http.clone(), &config));
    let enricher = Arc::new(DexScreenerEnricher::new(http.clone(), &config));
    let notifier = Arc::new(TelegramNotifier::new(http, &config));
    let coordinator = Coordinator::new(&config, screener, enricher, notifier);

    let mut listener_handle = tokio::spawn(listener.run());
    let coordinator_handle = tokio::spawn(coordinator.run(event_rx, shutdown_rx));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        joined = &mut listener_handle => {
            match joined {
                Ok(Err(e)) => error!(error = %e, "event stream terminated fatally"),
                Ok(Ok(())) => info!("event stream ended"),
                Err(e) => error!(error = %e, "listener task panicked"),
            }
        }
    }

    // Stop accepting envelopes and drain in-flight events first; the
    // event-source connection is closed last.
    let _ = shutdown_tx.send(true);
    if let Err(e) = coordinator_handle.await {
        error!(error = %e, "coordinator task failed during shutdown");
    }
    listener_handle.abort();

    info!("poolwatch stopped");
    Ok(())
}
