//! Conversation state machine
//!
//! `ConversationState` is a plain value mutated only by the session task.
//! Server events and local actions go in; the application snapshot and
//! playback directives come out. Nothing here performs IO.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionState, ResponsePayload, ServerEvent};
use crate::error::ProtocolError;
use crate::playback::PlayableAudioHandle;

/// Transcript placeholder shown while the service hears speech
pub const LISTENING_SENTINEL: &str = "Listening...";

pub const STATUS_LISTENING: &str = "Listening for speech...";
pub const STATUS_SPEECH_DETECTED: &str = "Speech detected!";
pub const STATUS_SPEECH_ENDED: &str = "Speech ended, processing...";

/// Whether the microphone is streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Idle,
    Listening,
}

/// Progress of the current turn, following the most recent event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingSpeech,
    SpeechActive,
    SpeechEnded,
    Processing,
    Responded,
}

/// Results of the latest turn. Replaced, not merged, by the next response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub transcript: Option<String>,
    pub assistant_reply: Option<String>,
    pub audio: Option<PlayableAudioHandle>,
    /// Server-side recording of the utterance, when reported
    pub audio_file: Option<String>,
}

/// Transient indicators; all cleared by a terminal event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusFlags {
    pub speech_active: bool,
    pub speech_status: Option<String>,
    pub processing_status: Option<String>,
    pub speech_chunks: Option<u64>,
}

impl StatusFlags {
    pub fn is_clear(&self) -> bool {
        *self == StatusFlags::default()
    }
}

/// What the session must do with reply audio after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Decode and present this base64 payload
    PlayReply(String),
    /// The turn carries no audio; drop the previous handle
    ReleaseReply,
}

/// Protocol-level counters kept alongside the state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounters {
    pub turns_completed: u64,
    pub malformed_frames: u64,
    pub unknown_events: u64,
    pub service_errors: u64,
}

/// Everything a presentation needs to render the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppSnapshot {
    pub connection: ConnectionState,
    pub connection_label: String,
    pub session_id: Option<String>,
    pub mode: SessionMode,
    pub phase: TurnPhase,
    pub turn: ConversationTurn,
    pub status: StatusFlags,
    pub last_error: Option<String>,
    pub turns_completed: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    connection: ConnectionState,
    session_id: Option<String>,
    mode: SessionMode,
    phase: TurnPhase,
    turn: ConversationTurn,
    status: StatusFlags,
    last_error: Option<String>,
    counters: EventCounters,
    updated_at: DateTime<Utc>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            session_id: None,
            mode: SessionMode::Idle,
            phase: TurnPhase::AwaitingSpeech,
            turn: ConversationTurn::default(),
            status: StatusFlags::default(),
            last_error: None,
            counters: EventCounters::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_listening(&self) -> bool {
        self.mode == SessionMode::Listening
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn turn(&self) -> &ConversationTurn {
        &self.turn
    }

    pub fn status(&self) -> &StatusFlags {
        &self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn counters(&self) -> EventCounters {
        self.counters
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn clear_status(&mut self) {
        self.status = StatusFlags::default();
    }

    /// Mirror the connection manager's state
    pub fn set_connection(&mut self, connection: ConnectionState) {
        if let ConnectionState::Connected {
            session_id: Some(id),
        } = &connection
        {
            self.session_id = Some(id.clone());
        }
        if let ConnectionState::Errored { reason } = &connection {
            self.last_error = Some(reason.clone());
        }
        self.connection = connection;
        self.touch();
    }

    /// The connection ended; the session id dies with it
    pub fn on_connection_closed(&mut self, reason: Option<&str>) {
        if let Some(reason) = reason {
            debug!("Connection closed by service: {}", reason);
        }
        self.connection = ConnectionState::Disconnected;
        self.session_id = None;
        self.touch();
    }

    /// A non-fatal failure to report (device, transport, playback)
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.touch();
    }

    /// Capture is running
    pub fn begin_listening(&mut self) {
        self.mode = SessionMode::Listening;
        self.phase = TurnPhase::AwaitingSpeech;
        self.status.speech_status = Some(STATUS_LISTENING.to_string());
        self.last_error = None;
        self.touch();
    }

    /// Capture was torn down, by the user or by connection loss
    pub fn end_listening(&mut self) {
        self.mode = SessionMode::Idle;
        self.clear_status();
        self.touch();
    }

    pub fn record_rejected_frame(&mut self, error: &ProtocolError) {
        warn!("Discarding inbound frame: {}", error);
        self.counters.malformed_frames += 1;
    }

    /// Apply one inbound event in arrival order
    pub fn apply_server_event(&mut self, event: ServerEvent) -> Option<Directive> {
        let directive = match event {
            ServerEvent::Connection {
                session_id,
                status,
                message,
            } => {
                info!(
                    "Session {} established{}",
                    session_id,
                    message.map(|m| format!(": {}", m)).unwrap_or_default()
                );
                if let Some(status) = status {
                    debug!("Connection status: {}", status);
                }
                self.connection = ConnectionState::Connected {
                    session_id: Some(session_id.clone()),
                };
                self.session_id = Some(session_id);
                None
            }

            ServerEvent::SpeechStart { rms, threshold } => {
                if let (Some(rms), Some(threshold)) = (rms, threshold) {
                    debug!("Speech start (rms {:.4}, threshold {:.4})", rms, threshold);
                }
                self.phase = TurnPhase::SpeechActive;
                self.status.speech_active = true;
                self.status.speech_chunks = None;
                self.status.speech_status = Some(STATUS_SPEECH_DETECTED.to_string());
                self.turn.transcript = Some(LISTENING_SENTINEL.to_string());
                None
            }

            ServerEvent::SpeechActive { duration_chunks } => {
                self.status.speech_chunks = Some(duration_chunks);
                self.status.speech_status = Some(format!("Speaking... ({} chunks)", duration_chunks));
                None
            }

            ServerEvent::SpeechEnd {
                speech_chunks,
                silence_chunks,
            } => {
                debug!(
                    "Speech end ({:?} speech chunks, {:?} silence chunks)",
                    speech_chunks, silence_chunks
                );
                self.phase = TurnPhase::SpeechEnded;
                self.status.speech_active = false;
                self.status.speech_status = Some(STATUS_SPEECH_ENDED.to_string());
                None
            }

            ServerEvent::Processing { message } => {
                self.phase = TurnPhase::Processing;
                self.status.processing_status = Some(message);
                None
            }

            ServerEvent::Response(payload) => Some(self.apply_response(payload)),

            ServerEvent::Notification { message } => {
                self.clear_status();
                self.phase = TurnPhase::Responded;
                // Notifications share the transcript slot
                self.turn.transcript = Some(message);
                None
            }

            ServerEvent::Error { message } => {
                warn!("Voice service reported an error: {}", message);
                self.clear_status();
                self.phase = TurnPhase::AwaitingSpeech;
                self.counters.service_errors += 1;
                self.last_error = Some(message);
                None
            }

            ServerEvent::Unknown { event_type } => {
                info!("Ignoring unknown event type: {}", event_type);
                self.counters.unknown_events += 1;
                return None;
            }
        };

        self.touch();
        directive
    }

    fn apply_response(&mut self, payload: ResponsePayload) -> Directive {
        self.clear_status();
        self.phase = TurnPhase::Responded;
        self.counters.turns_completed += 1;

        self.turn = ConversationTurn {
            transcript: Some(payload.stt.unwrap_or_default()),
            assistant_reply: Some(payload.llm.unwrap_or_default()),
            audio: None,
            audio_file: payload.audio_file,
        };

        match payload.tts {
            Some(tts) if !tts.is_empty() => Directive::PlayReply(tts),
            _ => Directive::ReleaseReply,
        }
    }

    /// Attach the handle produced for the current turn's reply
    pub fn attach_reply_audio(&mut self, handle: PlayableAudioHandle) {
        self.turn.audio = Some(handle);
        self.touch();
    }

    pub fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            connection: self.connection.clone(),
            connection_label: self.connection.label(),
            session_id: self.session_id.clone(),
            mode: self.mode,
            phase: self.phase,
            turn: self.turn.clone(),
            status: self.status.clone(),
            last_error: self.last_error.clone(),
            turns_completed: self.counters.turns_completed,
            updated_at: self.updated_at,
        }
    }
}
