use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, CaptureConfig};
use crate::config::Config;
use crate::connection::ConnectionConfig;

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service address and writer queue depth
    pub connection: ConnectionConfig,

    /// Frame size and rate on the wire
    pub capture: CaptureConfig,

    /// Device selection for the microphone backend
    pub backend: AudioBackendConfig,

    /// Microphone, or a WAV file replayed as one
    pub source: AudioSource,

    /// Play reply audio as soon as it arrives
    pub autoplay: bool,

    /// Output device name; `None` selects the host default
    pub output_device: Option<String>,

    /// Open the connection as soon as the session starts
    pub connect_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            capture: CaptureConfig::default(),
            backend: AudioBackendConfig::default(),
            source: AudioSource::Microphone,
            autoplay: true,
            output_device: None,
            connect_on_start: true,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl SessionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            connection: ConnectionConfig {
                url: cfg.server.url.clone(),
                outbound_capacity: cfg.server.outbound_capacity,
                connect_timeout: Duration::from_millis(cfg.server.connect_timeout_ms),
            },
            capture: CaptureConfig {
                block_size: cfg.audio.block_size,
                sample_rate: cfg.audio.sample_rate,
            },
            backend: AudioBackendConfig {
                target_sample_rate: cfg.audio.sample_rate,
                input_device: non_empty(&cfg.audio.input_device),
                ..AudioBackendConfig::default()
            },
            source: AudioSource::Microphone,
            autoplay: cfg.playback.autoplay,
            output_device: non_empty(&cfg.playback.output_device),
            connect_on_start: cfg.server.connect_on_start,
        }
    }

    /// Replay a WAV file instead of opening the microphone
    pub fn with_replay(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = AudioSource::File(path.into());
        self
    }
}
