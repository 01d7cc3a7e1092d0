//! Bidirectional streaming transport to the Live API.
//!
//! The four lifecycle hooks (open, message, close, error) arrive as
//! [`TransportEvent`]s on one channel. Outbound messages go through an
//! unbounded queue so capture never waits on the network; dropping every
//! outbound sender closes the socket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage, SetupRequest};
use crate::config::ServiceConfig;
use crate::error::{Result, TutorError};

#[derive(Debug)]
pub enum TransportEvent {
    Open,
    Message(ServerMessage),
    Close(Option<String>),
    Error(String),
}

/// An established session: outbound queue plus inbound event stream
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect and complete the setup handshake
    async fn open(&self, setup: SetupRequest) -> Result<TransportHandle>;
}

/// Live API over WebSocket (tokio-tungstenite)
pub struct WebSocketTransport {
    url: String,
    api_key: String,
    setup_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(service: &ServiceConfig) -> Self {
        Self {
            url: service.live_url.clone(),
            api_key: service.api_key.clone(),
            setup_timeout: service.setup_timeout(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, setup: SetupRequest) -> Result<TransportHandle> {
        info!("Connecting to Live API at {}", self.url);

        let url = format!("{}?key={}", self.url, self.api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TutorError::Connection(format!("connect: {e}")))?;

        let (mut write, mut read) = ws_stream.split();

        let model = setup.model.clone();
        let json = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| TutorError::Connection(format!("encode setup: {e}")))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| TutorError::Connection(format!("send setup: {e}")))?;

        // Wait for the server to accept the setup before streaming
        let handshake = async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if parse_setup_reply(text.as_bytes())? {
                            return Ok::<(), TutorError>(());
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if parse_setup_reply(&bytes)? {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return Err(TutorError::Connection(format!(
                            "closed during setup: {reason}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(TutorError::Connection(format!("read during setup: {e}")))
                    }
                    None => {
                        return Err(TutorError::Connection("closed during setup".into()))
                    }
                }
            }
        };

        tokio::time::timeout(self.setup_timeout, handshake)
            .await
            .map_err(|_| TutorError::Connection("timed out waiting for setupComplete".into()))??;

        info!("Live session established (model={})", model);

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::Open);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        let payload = match msg {
                            Some(Ok(Message::Text(text))) => text.into_bytes(),
                            Some(Ok(Message::Binary(bytes))) => bytes,
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame.map(|f| f.reason.to_string());
                                info!("Live API closed the session: {:?}", reason);
                                let _ = events_tx.send(TransportEvent::Close(reason));
                                break;
                            }
                            Some(Ok(_)) => continue, // Ping/Pong handled by tungstenite
                            Some(Err(e)) => {
                                error!("Live API read error: {}", e);
                                let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                let _ = events_tx.send(TransportEvent::Close(None));
                                break;
                            }
                        };

                        match parse_server_message(&payload) {
                            Ok(message) => {
                                if events_tx.send(TransportEvent::Message(message)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Ignoring unparseable server message: {}", e),
                        }
                    }
                    outbound = outbound_rx.recv() => {
                        let Some(message) = outbound else {
                            debug!("Outbound queue closed, closing socket");
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to encode outbound message: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json)).await {
                            error!("Live API send error: {}", e);
                            let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                }
            }

            debug!("Live API transport task stopped");
        });

        Ok(TransportHandle {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

fn parse_setup_reply(payload: &[u8]) -> Result<bool> {
    parse_server_message(payload)
        .map(|m| m.is_setup_complete())
        .map_err(|e| TutorError::Connection(e.to_string()))
}

fn parse_server_message(payload: &[u8]) -> Result<ServerMessage> {
    serde_json::from_slice(payload)
        .map_err(|e| TutorError::Format(format!("invalid server message: {e}")))
}
