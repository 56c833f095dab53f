// ABOUTME: WebSocket transport between the local terminal and the container bridge server
// Owns the connection lifecycle; outbound frames are queued only while the socket is open

use crate::terminal::protocol::{ConnectionState, Frame};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket is not open ({0:?})")]
    NotOpen(ConnectionState),
    #[error("connect was already called on this socket")]
    AlreadyStarted,
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("connection to {0} timed out")]
    Timeout(String),
}

/// Minimal outbound capability of a socket.
///
/// `send` is synchronous: it appends to the transport's outbound queue and
/// returns. It never buffers frames for a socket that is not open.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), TransportError>;
    fn is_open(&self) -> bool;
}

/// Build the bridge endpoint for a container, e.g. `ws://localhost:8080/ws/abc123`
pub fn endpoint_url(host: &str, port: u16, container_id: &str) -> String {
    format!("ws://{}:{}/ws/{}", host, port, container_id)
}

pub struct WebSocketTerminalClient {
    /// WebSocket URL of the bridge endpoint
    url: String,

    /// Lifecycle, observable through `state()` and `closed()`
    state: Arc<watch::Sender<ConnectionState>>,

    /// Outbound queue drained by the writer task
    outgoing_tx: mpsc::UnboundedSender<tungstenite::Message>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<tungstenite::Message>>>,

    /// Incoming data frames, handed to whoever takes them. The sender moves
    /// into the reader task so the stream ends when the socket does.
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,

    connect_timeout: Duration,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WebSocketTerminalClient {
    /// Create a client in the `Connecting` state. Nothing is sent until
    /// `connect` succeeds.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        Self {
            url: url.into(),
            state: Arc::new(state),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            incoming_tx: Mutex::new(Some(incoming_tx)),
            incoming_rx: Mutex::new(Some(incoming_rx)),
            connect_timeout,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform the handshake and start the reader and writer tasks.
    ///
    /// A failed handshake leaves the socket `Closed`. There is no retry.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let outgoing_rx = self
            .outgoing_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(TransportError::AlreadyStarted)?;
        let incoming_tx = self
            .incoming_tx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(TransportError::AlreadyStarted)?;

        info!("Starting WebSocket connection to {}", self.url);

        let ws_result = match tokio::time::timeout(self.connect_timeout, connect_async(&self.url)).await {
            Ok(result) => result,
            Err(_) => {
                error!("WebSocket connection timeout after {:?}", self.connect_timeout);
                self.state.send_replace(ConnectionState::Closed);
                return Err(TransportError::Timeout(self.url.clone()));
            }
        };

        let (ws_stream, response) = match ws_result {
            Ok(pair) => pair,
            Err(e) => {
                error!("WebSocket handshake failed: {}", e);
                if e.to_string().contains("refused") {
                    error!("Connection refused - is the bridge server running?");
                } else if e.to_string().contains("lookup") {
                    error!("DNS/hostname lookup failed - check the URL: {}", self.url);
                }
                self.state.send_replace(ConnectionState::Closed);
                return Err(TransportError::Connect {
                    url: self.url.clone(),
                    source: e,
                });
            }
        };

        info!("WebSocket connected successfully to {}", self.url);
        debug!("WebSocket response status: {:?}", response.status());

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let writer_state = self.state.clone();
        let mut outgoing_rx = outgoing_rx;
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = ws_sender.send(msg).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_state.send_replace(ConnectionState::Closed);
        });

        let reader_state = self.state.clone();
        let reader = tokio::spawn(async move {
            while let Some(ws_msg) = ws_receiver.next().await {
                let frame = match ws_msg {
                    Ok(tungstenite::Message::Text(text)) => Frame::Text(text),
                    Ok(tungstenite::Message::Binary(data)) => Frame::Binary(data),
                    Ok(tungstenite::Message::Close(close)) => {
                        match close {
                            Some(close) => info!("WebSocket closed by server: {} {}", close.code, close.reason),
                            None => info!("WebSocket closed by server"),
                        }
                        break;
                    }
                    // ping/pong are answered by tungstenite
                    Ok(_) => continue,
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                };
                if incoming_tx.send(frame).is_err() {
                    debug!("Incoming frame dropped, no receiver");
                }
            }
            reader_state.send_replace(ConnectionState::Closed);
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(writer);
            tasks.push(reader);
        }

        // A close may already have raced in, so only promote from Connecting
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });

        Ok(())
    }

    /// Take the stream of incoming data frames. Only the first call gets it.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Frame>> {
        self.incoming_rx.lock().ok().and_then(|mut guard| guard.take())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the socket is closed, for any reason
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// Send a close frame and stop accepting outbound frames
    pub fn close(&self) {
        if self.state().is_open() {
            info!("Closing WebSocket connection to {}", self.url);
            if self.outgoing_tx.send(tungstenite::Message::Close(None)).is_err() {
                warn!("Writer already gone while closing");
            }
        }
        self.state.send_replace(ConnectionState::Closed);
    }
}

impl MessageSink for WebSocketTerminalClient {
    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let state = self.state();
        if !state.is_open() {
            return Err(TransportError::NotOpen(state));
        }

        let msg = match frame {
            Frame::Text(text) => tungstenite::Message::Text(text),
            Frame::Binary(data) => tungstenite::Message::Binary(data),
        };
        self.outgoing_tx
            .send(msg)
            .map_err(|_| TransportError::NotOpen(ConnectionState::Closed))
    }

    fn is_open(&self) -> bool {
        self.state().is_open()
    }
}

impl Drop for WebSocketTerminalClient {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
