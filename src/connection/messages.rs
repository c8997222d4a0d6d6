use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Media type of the synthesized reply audio
pub const REPLY_MEDIA_TYPE: &str = "audio/wav";

/// Status event received from the voice service.
///
/// Every event may also carry the service's `session_id`; it is ignored
/// except on `connection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake: the service assigned a session
    Connection {
        session_id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },

    /// Voice activity detected
    SpeechStart {
        #[serde(default)]
        rms: Option<f64>,
        #[serde(default)]
        threshold: Option<f64>,
    },

    /// Speech continues; progress in capture chunks
    SpeechActive { duration_chunks: u64 },

    /// Silence after speech; the utterance is being processed
    SpeechEnd {
        #[serde(default)]
        speech_chunks: Option<u64>,
        #[serde(default)]
        silence_chunks: Option<u64>,
    },

    Processing {
        #[serde(default)]
        message: String,
    },

    /// Completed turn
    Response(ResponsePayload),

    Notification {
        #[serde(default)]
        message: String,
    },

    /// Service-side failure; informational, the connection stays open
    Error {
        #[serde(default)]
        message: String,
    },

    /// A `type` this client does not know
    #[serde(skip)]
    Unknown { event_type: String },
}

/// Payload of a `response` event; all fields optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Transcript of the user's utterance
    #[serde(default)]
    pub stt: Option<String>,

    /// Assistant reply text
    #[serde(default)]
    pub llm: Option<String>,

    /// Base64-encoded WAV of the spoken reply
    #[serde(default)]
    pub tts: Option<String>,

    /// Server-side file name of the recorded utterance
    #[serde(default)]
    pub audio_file: Option<String>,
}

const KNOWN_TYPES: &[&str] = &[
    "connection",
    "speech_start",
    "speech_active",
    "speech_end",
    "processing",
    "response",
    "notification",
    "error",
];

impl ServerEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::Connection { .. } => "connection",
            ServerEvent::SpeechStart { .. } => "speech_start",
            ServerEvent::SpeechActive { .. } => "speech_active",
            ServerEvent::SpeechEnd { .. } => "speech_end",
            ServerEvent::Processing { .. } => "processing",
            ServerEvent::Response(_) => "response",
            ServerEvent::Notification { .. } => "notification",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown { event_type } => event_type,
        }
    }

    /// Whether this event ends the current turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerEvent::Response(_) | ServerEvent::Notification { .. } | ServerEvent::Error { .. }
        )
    }
}

/// Decode one inbound text frame.
///
/// Unknown types decode to `ServerEvent::Unknown`; only structurally broken
/// frames are errors.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&event_type.as_str()) {
        return Ok(ServerEvent::Unknown { event_type });
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidField {
        event: event_type,
        reason: e.to_string(),
    })
}
