pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod playback;
pub mod session;
pub mod terminal;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSource,
    CaptureConfig, CapturePipeline, FrameAssembler,
};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState, ServerEvent};
pub use error::{CaptureError, ConnectionError, PlaybackError, ProtocolError, SessionError};
pub use http::{create_router, AppState};
pub use playback::{AudioRegistry, PlayableAudioHandle, PlaybackController, PlaybackSurface};
pub use session::{AppSnapshot, ConversationState, Session, SessionConfig, SessionHandle, SessionStats};
