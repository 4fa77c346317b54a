use crate::error::{Result, VoiceError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{parse_text_frame, SessionEvent};

/// Connection lifecycle: Closed -> Connecting -> Open -> Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Closed,
    Connecting,
    Open,
}

/// What the transport hands to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Event(SessionEvent),
    /// Always the last item on the channel
    Closed { reason: String },
}

/// Duplex connection to the voice endpoint
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Open the connection; inbound events arrive on the returned channel in order
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>>;

    /// Queue bytes for delivery; order of calls is the order on the wire
    fn send(&self, bytes: Bytes) -> Result<()>;

    /// Close the connection; safe to call in any state
    async fn close(&mut self);

    fn state(&self) -> TransportState;
}

/// WebSocket transport
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    state: Arc<watch::Sender<TransportState>>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    cancel: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(TransportState::Closed);
        Self {
            url: url.into(),
            connect_timeout,
            state: Arc::new(state),
            outbound: None,
            cancel: None,
            tasks: Vec::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Watch state changes, including closes initiated by the server
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>> {
        if *self.state.borrow() != TransportState::Closed {
            return Err(VoiceError::Connection(format!(
                "transport to {} is not closed",
                self.url
            )));
        }
        // Reap tasks from a previous connection.
        self.close().await;

        info!("Connecting to voice endpoint at {}", self.url);
        self.state.send_replace(TransportState::Connecting);

        let ws = match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                self.state.send_replace(TransportState::Closed);
                return Err(VoiceError::Connection(format!("{}: {}", self.url, e)));
            }
            Err(_) => {
                self.state.send_replace(TransportState::Closed);
                return Err(VoiceError::Connection(format!(
                    "{}: handshake timed out after {:?}",
                    self.url, self.connect_timeout
                )));
            }
        };

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        self.state.send_replace(TransportState::Open);

        let writer_cancel = cancel.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = out_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = sink.send(msg).await {
                                warn!("Failed to send frame: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_cancel.cancelled() => break,
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
            debug!("Transport writer stopped");
        });

        let reader_cancel = cancel.clone();
        let state = Arc::clone(&self.state);
        let reader = tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break "closed by client".to_string(),
                    msg = stream.next() => {
                        let event = match msg {
                            Some(Ok(Message::Text(text))) => match parse_text_frame(&text) {
                                Some(event) => event,
                                None => continue,
                            },
                            Some(Ok(Message::Binary(data))) => SessionEvent::AudioFrame(Bytes::from(data)),
                            Some(Ok(Message::Close(frame))) => {
                                break match frame {
                                    Some(frame) => format!("closed by server: {} {}", frame.code, frame.reason),
                                    None => "closed by server".to_string(),
                                };
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => break format!("transport error: {}", e),
                            None => break "connection ended".to_string(),
                        };
                        tokio::select! {
                            _ = reader_cancel.cancelled() => break "closed by client".to_string(),
                            sent = event_tx.send(TransportEvent::Event(event)) => {
                                if sent.is_err() {
                                    break "event receiver dropped".to_string();
                                }
                            }
                        }
                    }
                }
            };

            let closed_by_client = reader_cancel.is_cancelled();
            state.send_replace(TransportState::Closed);
            reader_cancel.cancel();
            info!("Voice transport closed: {}", reason);

            let closed = TransportEvent::Closed { reason };
            if closed_by_client {
                // The controller may be awaiting close(); never block on it.
                let _ = event_tx.try_send(closed);
            } else {
                let _ = event_tx.send(closed).await;
            }
        });

        self.outbound = Some(out_tx);
        self.cancel = Some(cancel);
        self.tasks = vec![writer, reader];

        info!("Connected to voice endpoint");

        Ok(event_rx)
    }

    fn send(&self, bytes: Bytes) -> Result<()> {
        if *self.state.borrow() != TransportState::Open {
            return Err(VoiceError::NotConnected);
        }
        let outbound = self.outbound.as_ref().ok_or(VoiceError::NotConnected)?;
        let len = bytes.len();
        outbound
            .send(Message::Binary(bytes.to_vec()))
            .map_err(|_| VoiceError::NotConnected)?;
        debug!("Queued {} bytes for the voice endpoint", len);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.outbound = None;
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Transport task failed: {}", e);
            }
        }
        self.state.send_replace(TransportState::Closed);
    }

    fn state(&self) -> TransportState {
        *self.state.borrow()
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
