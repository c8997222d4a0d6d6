//! Error taxonomy for the voice client.
//!
//! Device, transport, protocol and playback failures each get their own enum so
//! callers can decide what is fatal. Only transport loss resets the session;
//! everything else is reported and the session carries on.

use thiserror::Error;

/// Microphone acquisition and capture failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("capture already active")]
    AlreadyCapturing,

    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("capture source error: {0}")]
    Io(String),
}

/// Failures establishing the duplex connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("a connection is already open or opening")]
    AlreadyConnected,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("failed to connect: {0}")]
    Connect(String),
}

/// Inbound frames that could not be turned into a `ServerEvent`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed JSON frame: {0}")]
    MalformedJson(String),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("invalid field in `{event}` event: {reason}")]
    InvalidField { event: String, reason: String },
}

/// Reply audio that could not be decoded or played.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("reply audio is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("reply audio payload is empty")]
    EmptyPayload,

    #[error("audio output failed: {0}")]
    Output(String),
}

/// Rejections of user actions at the session level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not connected to the voice service")]
    NotConnected,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("session has shut down")]
    Stopped,
}
