use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{decode_server_event, ServerEvent};
use crate::audio::{frame_to_bytes, AudioFrame, DropReason, FrameSink, SendOutcome};
use crate::error::{ConnectionError, ProtocolError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection status as owned by the `ConnectionManager`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open; `session_id` arrives with the service's `connection` event
    Connected { session_id: Option<String> },
    Errored { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Connected or on the way there
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected { .. } | ConnectionState::Connecting
        )
    }

    pub fn label(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Connected { session_id: None } => "Connected".to_string(),
            ConnectionState::Connected {
                session_id: Some(id),
            } => format!("Connected ({})", id),
            ConnectionState::Errored { .. } => "Error".to_string(),
        }
    }
}

/// Signals emitted for one connection, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Server(ServerEvent),
    /// An inbound frame that could not be decoded; already logged
    Rejected(ProtocolError),
    Error(String),
    /// Always the last event of a connection
    Closed { reason: Option<String> },
}

/// Event sequence of a single connection.
///
/// Ends after `Closed`; a new connection yields a new sequence.
pub struct ConnectionEvents {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionEvents {
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Writer queue depth; a full queue drops frames instead of growing
    pub outbound_capacity: usize,
    /// Limit on the WebSocket handshake
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            outbound_capacity: 32,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A handshake begun by [`ConnectionManager::begin_connect`].
///
/// Drive it with [`PendingConnect::handshake`] on any task, then hand the
/// result back to [`ConnectionManager::finish_connect`].
#[derive(Debug)]
pub struct PendingConnect {
    generation: u64,
    url: String,
    timeout: Duration,
}

impl PendingConnect {
    pub async fn handshake(self) -> Handshake {
        let connect = connect_async(self.url.as_str());
        let result = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(ConnectionError::Connect(e.to_string())),
            Err(_) => Err(ConnectionError::Connect(format!(
                "handshake timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };

        Handshake {
            generation: self.generation,
            url: self.url,
            result,
        }
    }
}

/// Outcome of a handshake, not yet installed as the live connection
pub struct Handshake {
    generation: u64,
    url: String,
    result: Result<WsStream, ConnectionError>,
}

struct Outbound {
    generation: u64,
    tx: mpsc::Sender<Message>,
}

/// State shared with the reader/writer tasks and every `FrameSender`.
///
/// Lock order: `outbound` before `state`.
struct Shared {
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<Outbound>>,
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn set_state_if_current(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.set_state(state);
        }
    }

    fn outbound(&self) -> std::sync::MutexGuard<'_, Option<Outbound>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detach the writer queue of `generation` and mark the link down
    fn finish(&self, generation: u64) {
        let mut outbound = self.outbound();
        if outbound.as_ref().map(|o| o.generation) == Some(generation) {
            *outbound = None;
        }
        if self.is_current(generation) {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Owns the single duplex connection to the voice service
pub struct ConnectionManager {
    config: ConnectionConfig,
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            shared: Arc::new(Shared {
                state,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Cloneable, non-blocking frame sender bound to whichever connection is open
    pub fn sender(&self) -> FrameSender {
        FrameSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Open the connection and wait for the handshake.
    ///
    /// At most one connection is live; connecting while connected or
    /// connecting is rejected.
    pub async fn connect(&mut self, url: &str) -> Result<ConnectionEvents, ConnectionError> {
        let pending = self.begin_connect(url)?;
        let handshake = pending.handshake().await;
        self.finish_connect(handshake)
    }

    /// Validate `url` and enter `Connecting` without touching the network
    pub fn begin_connect(&mut self, url: &str) -> Result<PendingConnect, ConnectionError> {
        if self.state().is_live() {
            return Err(ConnectionError::AlreadyConnected);
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConnectionError::InvalidUrl(url.to_string()));
        }

        self.tasks.retain(|task| !task.is_finished());

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(ConnectionState::Connecting);
        info!("Connecting to voice service at {}", url);

        Ok(PendingConnect {
            generation,
            url: url.to_string(),
            timeout: self.config.connect_timeout,
        })
    }

    /// Install a finished handshake as the live connection.
    ///
    /// A handshake overtaken by `close()` is discarded.
    pub fn finish_connect(
        &mut self,
        handshake: Handshake,
    ) -> Result<ConnectionEvents, ConnectionError> {
        let Handshake {
            generation,
            url,
            result,
        } = handshake;

        let ws = match result {
            Ok(ws) => ws,
            Err(e) => {
                error!("Failed to connect to {}: {}", url, e);
                self.shared.set_state_if_current(
                    generation,
                    ConnectionState::Errored {
                        reason: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        if !self.shared.is_current(generation) {
            return Err(ConnectionError::Connect("closed while connecting".into()));
        }

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(ConnectionEvent::Opened);

        {
            let mut outbound = self.shared.outbound();
            *outbound = Some(Outbound {
                generation,
                tx: out_tx,
            });
            self.shared
                .set_state(ConnectionState::Connected { session_id: None });
        }

        self.tasks.push(tokio::spawn(write_loop(sink, out_rx)));
        self.tasks.push(tokio::spawn(read_loop(
            stream,
            events_tx,
            generation,
            Arc::clone(&self.shared),
        )));

        info!("Connected to voice service");
        Ok(ConnectionEvents { rx: events_rx })
    }

    /// Close the connection. Idempotent; safe from any state.
    ///
    /// Tasks of the closed connection stop touching shared state immediately;
    /// its event sequence still ends with `Closed`.
    pub fn close(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let had_link = {
            let mut outbound = self.shared.outbound();
            let had_link = outbound.take().is_some();
            // Dropping the queue sender lets the writer flush and send a close frame
            if self.state() != ConnectionState::Disconnected {
                self.shared.set_state(ConnectionState::Disconnected);
            }
            had_link
        };

        if had_link {
            info!("Closing connection to voice service");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut out_rx: mpsc::Receiver<Message>) {
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!("Failed to send frame: {}", e);
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Close handshake ended with: {}", e);
    }
    debug!("Writer task finished");
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    generation: u64,
    shared: Arc<Shared>,
) {
    let mut close_reason = None;

    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => match decode_server_event(&text) {
                Ok(event) => {
                    if let ServerEvent::Connection { session_id, .. } = &event {
                        shared.set_state_if_current(
                            generation,
                            ConnectionState::Connected {
                                session_id: Some(session_id.clone()),
                            },
                        );
                    }
                    let _ = events.send(ConnectionEvent::Server(event));
                }
                Err(e) => {
                    warn!("Ignoring inbound frame: {}", e);
                    let _ = events.send(ConnectionEvent::Rejected(e));
                }
            },
            Ok(Message::Close(frame)) => {
                close_reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|reason| !reason.is_empty());
            }
            Ok(Message::Binary(data)) => {
                debug!("Ignoring {} byte binary frame from service", data.len());
            }
            Ok(_) => {}
            Err(e) => {
                error!("Connection error: {}", e);
                shared.set_state_if_current(
                    generation,
                    ConnectionState::Errored {
                        reason: e.to_string(),
                    },
                );
                let _ = events.send(ConnectionEvent::Error(e.to_string()));
                break;
            }
        }
    }

    shared.finish(generation);
    info!("Connection closed");
    let _ = events.send(ConnectionEvent::Closed {
        reason: close_reason,
    });
}

/// Handle the capture pipeline uses to push frames.
///
/// Never blocks and never queues beyond the writer's bounded capacity.
#[derive(Clone)]
pub struct FrameSender {
    shared: Arc<Shared>,
}

impl FrameSender {
    pub fn send(&self, bytes: Vec<u8>) -> SendOutcome {
        let outbound = self.shared.outbound();

        let Some(link) = outbound.as_ref() else {
            debug!("Dropping {} byte frame: not connected", bytes.len());
            return SendOutcome::Dropped(DropReason::NotConnected);
        };
        if !self.shared.state.borrow().is_connected() {
            debug!("Dropping {} byte frame: not connected", bytes.len());
            return SendOutcome::Dropped(DropReason::NotConnected);
        }

        match link.tx.try_send(Message::Binary(bytes)) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Dropping frame: writer queue full");
                SendOutcome::Dropped(DropReason::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                SendOutcome::Dropped(DropReason::NotConnected)
            }
        }
    }
}

impl FrameSink for FrameSender {
    fn send_frame(&self, frame: AudioFrame) -> SendOutcome {
        self.send(frame_to_bytes(&frame.samples))
    }
}
