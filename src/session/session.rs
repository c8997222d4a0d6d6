use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{AppSnapshot, ConversationState, Directive};
use super::stats::SessionStats;
use crate::audio::{AudioBackend, CaptureEvent, CapturePipeline, InputFormat};
use crate::connection::{
    ConnectionEvent, ConnectionEvents, ConnectionManager, Handshake, ServerEvent,
    REPLY_MEDIA_TYPE,
};
use crate::error::{CaptureError, ConnectionError, SessionError};
use crate::playback::{AudioRegistry, AutoplayOutcome, PlaybackController, PlaybackSurface};

/// User actions, each answered on its own reply channel
#[derive(Debug)]
pub enum SessionCommand {
    /// Open the connection; `None` uses the configured url
    Connect {
        url: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    StartListening {
        reply: oneshot::Sender<Result<InputFormat, SessionError>>,
    },
    StopListening {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

type ConnectReply = oneshot::Sender<Result<(), SessionError>>;

/// One input for the session loop
enum Input {
    Command(Option<SessionCommand>),
    Connection(Option<ConnectionEvent>),
    Capture(Option<CaptureEvent>),
    Handshake(Result<Handshake, JoinError>),
}

/// A handshake running on its own task while the session keeps serving
struct PendingConnect {
    task: JoinHandle<Handshake>,
    /// `None` for the connect made on start
    reply: Option<ConnectReply>,
}

/// A voice session: owns the connection, capture pipeline, playback and
/// conversation state, and serialises every mutation on one task.
///
/// Construct with [`Session::new`], then drive with [`Session::run`]. All
/// interaction goes through the returned [`SessionHandle`].
pub struct Session {
    config: SessionConfig,
    connection: ConnectionManager,
    connection_events: Option<ConnectionEvents>,
    pending_connect: Option<PendingConnect>,
    capture: CapturePipeline,
    playback: PlaybackController,
    state: ConversationState,
    commands: mpsc::Receiver<SessionCommand>,
    snapshot_tx: watch::Sender<AppSnapshot>,
    stats_tx: watch::Sender<SessionStats>,
    started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(config: SessionConfig, backend: Box<dyn AudioBackend>) -> (Self, SessionHandle) {
        let connection = ConnectionManager::new(config.connection.clone());
        let capture = CapturePipeline::new(backend, Arc::new(connection.sender()), config.capture);
        let playback = PlaybackController::new(AudioRegistry::new(), config.autoplay);

        let state = ConversationState::new();
        let started_at = Utc::now();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let (commands_tx, commands) = mpsc::channel(16);

        let (stats_tx, stats_rx) = watch::channel(empty_stats(started_at));

        let session = Self {
            config,
            connection,
            connection_events: None,
            pending_connect: None,
            capture,
            playback,
            state,
            commands,
            snapshot_tx,
            stats_tx,
            started_at,
        };

        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            stats: stats_rx,
        };

        (session, handle)
    }

    /// Attach the surface reply audio plays on
    pub fn attach_surface(&mut self, surface: Box<dyn PlaybackSurface>) {
        self.playback.attach(surface);
    }

    pub fn stats(&self) -> SessionStats {
        let capture = self.capture.stats();
        let counters = self.state.counters();

        SessionStats {
            connection: self.connection.state(),
            listening: self.state.is_listening(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
            frames_sent: capture.frames_sent,
            frames_dropped: capture.frames_dropped,
            bytes_sent: capture.bytes_sent,
            turns_completed: counters.turns_completed,
            malformed_frames: counters.malformed_frames,
            unknown_events: counters.unknown_events,
            service_errors: counters.service_errors,
            live_audio_handles: self.playback.registry().len(),
        }
    }

    /// Process inputs until shutdown or until every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!("Voice session started");

        if self.config.connect_on_start {
            self.begin_connect(None, None);
        }
        self.publish();

        loop {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                event = next_connection_event(&mut self.connection_events) => Input::Connection(event),
                event = self.capture.next_event() => Input::Capture(event),
                result = next_handshake(&mut self.pending_connect) => Input::Handshake(result),
            };

            match input {
                Input::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Input::Command(None) => {
                    debug!("All session handles dropped");
                    let _ = self.teardown().await;
                    break;
                }
                Input::Connection(Some(event)) => self.handle_connection_event(event).await,
                Input::Connection(None) => {
                    // Sequence ended without Closed (task aborted)
                    self.on_closed(None).await;
                }
                Input::Capture(Some(event)) => self.handle_capture_event(event).await,
                Input::Capture(None) => {}
                Input::Handshake(result) => self.finish_connect(result),
            }

            self.publish();
        }

        self.publish();
        info!("Voice session ended");
        Ok(())
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.state.snapshot());
        self.stats_tx.send_replace(self.stats());
    }

    /// Returns false once the session should stop.
    ///
    /// State is published before replying so callers observe the result.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Connect { url, reply } => {
                // Answered from finish_connect once the handshake completes
                self.begin_connect(url, Some(reply));
            }
            SessionCommand::Disconnect { reply } => {
                let cancelled = self.disconnect().await;
                self.publish();
                cancel_connect(cancelled);
                let _ = reply.send(());
            }
            SessionCommand::StartListening { reply } => {
                let result = self.start_listening().await;
                self.publish();
                let _ = reply.send(result);
            }
            SessionCommand::StopListening { reply } => {
                self.stop_listening().await;
                self.publish();
                let _ = reply.send(());
            }
            SessionCommand::Shutdown { reply } => {
                let cancelled = self.teardown().await;
                self.publish();
                cancel_connect(cancelled);
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    /// Start a handshake off the session task; the loop keeps serving
    /// commands and events until `finish_connect` sees its result.
    fn begin_connect(&mut self, url: Option<String>, reply: Option<ConnectReply>) {
        let url = url.unwrap_or_else(|| self.config.connection.url.clone());

        match self.connection.begin_connect(&url) {
            Ok(pending) => {
                self.state.set_connection(self.connection.state());
                self.pending_connect = Some(PendingConnect {
                    task: tokio::spawn(pending.handshake()),
                    reply,
                });
            }
            Err(e) => {
                self.state.set_connection(self.connection.state());
                self.state.record_error(e.to_string());
                self.publish();
                self.answer_connect(reply, Err(SessionError::Connection(e)));
            }
        }
    }

    fn finish_connect(&mut self, result: Result<Handshake, JoinError>) {
        let Some(pending) = self.pending_connect.take() else {
            return;
        };

        let installed = match result {
            Ok(handshake) => self.connection.finish_connect(handshake),
            Err(e) => {
                self.connection.close();
                Err(ConnectionError::Connect(format!("handshake task failed: {}", e)))
            }
        };

        let result = match installed {
            Ok(events) => {
                self.connection_events = Some(events);
                self.state.set_connection(self.connection.state());
                Ok(())
            }
            Err(e) => {
                self.state.set_connection(self.connection.state());
                self.state.record_error(e.to_string());
                Err(SessionError::Connection(e))
            }
        };

        self.publish();
        self.answer_connect(pending.reply, result);
    }

    fn answer_connect(&self, reply: Option<ConnectReply>, result: Result<(), SessionError>) {
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!("Initial connection failed: {}", e);
                }
            }
        }
    }

    /// Abort an in-flight handshake, returning its waiter
    fn abandon_connect(&mut self) -> Option<ConnectReply> {
        let pending = self.pending_connect.take()?;
        pending.task.abort();
        info!("Connection attempt abandoned");
        pending.reply
    }

    async fn disconnect(&mut self) -> Option<ConnectReply> {
        let cancelled = self.abandon_connect();
        self.stop_capture().await;
        self.connection.close();
        self.connection_events = None;
        self.state.end_listening();
        self.state.on_connection_closed(None);
        cancelled
    }

    async fn start_listening(&mut self) -> Result<InputFormat, SessionError> {
        if !self.connection.state().is_connected() {
            warn!("Cannot start listening: not connected");
            return Err(SessionError::NotConnected);
        }

        match self.capture.start().await {
            Ok(format) => {
                info!(
                    "Listening on {} ({}Hz, {} ch)",
                    format.device_name, format.device_sample_rate, format.device_channels
                );
                self.state.begin_listening();
                Ok(format)
            }
            Err(CaptureError::AlreadyCapturing) => {
                Err(SessionError::Capture(CaptureError::AlreadyCapturing))
            }
            Err(e) => {
                error!("Failed to start listening: {}", e);
                self.state.record_error(e.to_string());
                Err(SessionError::Capture(e))
            }
        }
    }

    async fn stop_listening(&mut self) {
        self.stop_capture().await;
        self.state.end_listening();
    }

    async fn stop_capture(&mut self) {
        if let Err(e) = self.capture.stop().await {
            error!("Error while stopping capture: {:#}", e);
        }
    }

    async fn teardown(&mut self) -> Option<ConnectReply> {
        let cancelled = self.abandon_connect();
        self.stop_capture().await;
        self.connection.close();
        self.connection_events = None;
        self.playback.release();
        self.state.end_listening();
        self.state.on_connection_closed(None);
        cancelled
    }

    async fn on_closed(&mut self, reason: Option<String>) {
        self.connection_events = None;
        if self.capture.is_active() || self.state.is_listening() {
            info!("Connection lost; stopping capture");
            self.stop_capture().await;
            self.state.end_listening();
        }
        self.state.on_connection_closed(reason.as_deref());
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                self.state.set_connection(self.connection.state());
            }
            ConnectionEvent::Server(event) => self.handle_server_event(event),
            ConnectionEvent::Rejected(e) => self.state.record_rejected_frame(&e),
            ConnectionEvent::Error(message) => {
                self.state.set_connection(self.connection.state());
                self.state.record_error(message);
            }
            ConnectionEvent::Closed { reason } => self.on_closed(reason).await,
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        debug!("Server event: {}", event.kind());

        match self.state.apply_server_event(event) {
            Some(Directive::PlayReply(audio)) => {
                match self.playback.present(&audio, REPLY_MEDIA_TYPE) {
                    Ok((handle, outcome)) => {
                        match &outcome {
                            AutoplayOutcome::Started => info!("Playing reply ({})", handle.uri),
                            AutoplayOutcome::Disabled => {
                                info!("Reply audio ready ({}); autoplay disabled", handle.uri)
                            }
                            AutoplayOutcome::NoSurface | AutoplayOutcome::Failed(_) => {}
                        }
                        self.state.attach_reply_audio(handle);
                    }
                    Err(e) => {
                        warn!("Discarding reply audio: {}", e);
                        self.state.record_error(e.to_string());
                    }
                }
            }
            Some(Directive::ReleaseReply) => self.playback.release(),
            None => {}
        }
    }

    async fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::DeviceError(message) => {
                error!("Input device failed: {}", message);
                self.stop_capture().await;
                self.state.end_listening();
                self.state.record_error(message);
            }
            CaptureEvent::SourceEnded => {
                info!("Audio source ended");
                self.stop_capture().await;
                self.state.end_listening();
            }
        }
    }
}

async fn next_connection_event(events: &mut Option<ConnectionEvents>) -> Option<ConnectionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_handshake(pending: &mut Option<PendingConnect>) -> Result<Handshake, JoinError> {
    match pending {
        Some(pending) => (&mut pending.task).await,
        None => std::future::pending().await,
    }
}

/// Tell a caller still waiting on a handshake that it was cut short
fn cancel_connect(reply: Option<ConnectReply>) {
    if let Some(reply) = reply {
        let _ = reply.send(Err(SessionError::Connection(ConnectionError::Connect(
            "connection attempt cancelled".into(),
        ))));
    }
}

fn empty_stats(started_at: DateTime<Utc>) -> SessionStats {
    SessionStats {
        connection: crate::connection::ConnectionState::Disconnected,
        listening: false,
        started_at,
        uptime_secs: 0.0,
        frames_sent: 0,
        frames_dropped: 0,
        bytes_sent: 0,
        turns_completed: 0,
        malformed_frames: 0,
        unknown_events: 0,
        service_errors: 0,
        live_audio_handles: 0,
    }
}

/// Cloneable control surface for a running [`Session`]
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<AppSnapshot>,
    stats: watch::Receiver<SessionStats>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Stopped)?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    /// Connect, or reconnect after a loss; `None` uses the configured url
    pub async fn connect(&self, url: Option<String>) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Connect { url, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await
    }

    /// Start streaming the microphone; requires an open connection
    pub async fn start_listening(&self) -> Result<InputFormat, SessionError> {
        self.request(|reply| SessionCommand::StartListening { reply })
            .await?
    }

    /// Stop streaming; always succeeds while the session runs
    pub async fn stop_listening(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::StopListening { reply })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Shutdown { reply })
            .await
    }

    pub fn snapshot(&self) -> AppSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    /// Receiver that wakes on every state change
    pub fn watch_snapshot(&self) -> watch::Receiver<AppSnapshot> {
        self.snapshot.clone()
    }
}
