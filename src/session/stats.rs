use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::connection::ConnectionState;

/// Statistics about a voice session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Current connection state
    pub connection: ConnectionState,

    /// Whether capture is currently active
    pub listening: bool,

    /// When the session task started
    pub started_at: DateTime<Utc>,

    /// Seconds since `started_at`
    pub uptime_secs: f64,

    /// Audio frames handed to the connection
    pub frames_sent: u64,

    /// Audio frames dropped while disconnected or backed up
    pub frames_dropped: u64,

    /// PCM bytes handed to the connection
    pub bytes_sent: u64,

    /// `response` events processed
    pub turns_completed: u64,

    /// Inbound frames that failed to decode
    pub malformed_frames: u64,

    /// Inbound events with an unrecognised type
    pub unknown_events: u64,

    /// `error` events reported by the service
    pub service_errors: u64,

    /// Reply audio handles currently registered (at most one)
    pub live_audio_handles: usize,
}
