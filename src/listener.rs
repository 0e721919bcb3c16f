//! Event source adapter: a persistent WebSocket subscription to the
//! program's log stream.
//!
//! The adapter owns exactly one logical subscription. On connection loss it
//! reconnects with exponential backoff (bounded delay, unbounded attempts);
//! only a rejected handshake is fatal and stops the pipeline, since no
//! further events can be detected without credentials. Envelopes are emitted
//! in receive order on a broadcast channel whose bounded buffer drops the
//! oldest entries for lagging consumers.

use crate::types::RawEventEnvelope;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("event stream handshake rejected: {0}")]
    HandshakeRejected(String),
}

enum StreamFailure {
    Fatal(String),
    Transient(String),
}

/// WebSocket listener for pool creation logs.
pub struct EventListener {
    ws_url: String,
    program_id: String,
    events: broadcast::Sender<RawEventEnvelope>,
    seq: u64,
}

impl EventListener {
    pub fn new(
        ws_url: String,
        program_id: String,
        events: broadcast::Sender<RawEventEnvelope>,
    ) -> Self {
        Self {
            ws_url,
            program_id,
            events,
            seq: 0,
        }
    }

    fn subscribe_request(&self) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [self.program_id] },
                { "commitment": "confirmed" }
            ]
        })
        .to_string()
    }

    /// Receive loop with reconnection. Runs until a fatal handshake
    /// rejection; the caller aborts the task to stop it otherwise.
    pub async fn run(mut self) -> Result<(), ListenerError> {
        let mut delay = INITIAL_BACKOFF;
        loop {
            match self.connect().await {
                Ok(mut ws) => {
                    delay = INITIAL_BACKOFF;
                    match self.stream(&mut ws).await {
                        Ok(()) => info!("event stream closed by server, reconnecting"),
                        Err(reason) => warn!(%reason, "event stream error, reconnecting"),
                    }
                }
                Err(StreamFailure::Fatal(reason)) => {
                    error!(%reason, "event stream handshake rejected");
                    return Err(ListenerError::HandshakeRejected(reason));
                }
                Err(StreamFailure::Transient(reason)) => {
                    warn!(%reason, "event stream connection failed, reconnecting");
                }
            }

            debug!(backoff = ?delay, "waiting before reconnect");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    async fn connect(&self) -> Result<WsStream, StreamFailure> {
        info!(url = %self.ws_url, "connecting to event stream");
        let (mut ws, _response) = connect_async(&self.ws_url).await.map_err(classify)?;

        ws.send(Message::Text(self.subscribe_request()))
            .await
            .map_err(|e| StreamFailure::Transient(e.to_string()))?;
        info!(program = %self.program_id, "log subscription requested");
        Ok(ws)
    }

    /// Forward messages until the server closes or errors. Envelopes keep
    /// their receive order; no reordering happens here.
    async fn stream(&mut self, ws: &mut WsStream) -> Result<(), String> {
        while let Some(message) = ws.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    self.seq += 1;
                    let envelope = RawEventEnvelope {
                        seq: self.seq,
                        payload: text,
                        received_at: Utc::now(),
                    };
                    if self.events.send(envelope).is_err() {
                        debug!("no active envelope receivers");
                    }
                }
                Ok(Message::Ping(data)) => {
                    ws.send(Message::Pong(data))
                        .await
                        .map_err(|e| e.to_string())?;
                }
                Ok(Message::Close(frame)) => {
                    info!(?frame, "server closed the event stream");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(())
    }
}

fn classify(error: tungstenite::Error) -> StreamFailure {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            StreamFailure::Fatal(format!(
                "handshake rejected with status {}",
                response.status()
            ))
        }
        other => StreamFailure::Transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_targets_program_logs() {
        let (tx, _rx) = broadcast::channel(8);
        let listener = EventListener::new(
            "wss://example.invalid".to_string(),
            "ProgramId111".to_string(),
            tx,
        );

        let request: serde_json::Value =
            serde_json::from_str(&listener.subscribe_request()).expect("valid json");
        assert_eq!(request["method"], "logsSubscribe");
        assert_eq!(request["params"][0]["mentions"][0], "ProgramId111");
        assert_eq!(request["params"][1]["commitment"], "confirmed");
    }
}
