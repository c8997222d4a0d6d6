use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::CaptureError;

/// One block of 16-bit PCM ready for the wire (mono, little-endian on send)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Encoded samples, exactly one capture block long
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Position of this frame in the capture stream (0-indexed)
    pub sequence: u64,
    /// Stream-relative start time in milliseconds
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Size of the frame on the wire
    pub fn byte_len(&self) -> usize {
        self.samples.len() * 2
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Rate the backend must deliver samples at (resamples if the device differs)
    pub target_sample_rate: u32,
    /// Input device name; `None` selects the host default
    pub input_device: Option<String>,
    /// Replay chunk length for file sources, in milliseconds
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Service expects 16kHz
            input_device: None,
            buffer_duration_ms: 100,
        }
    }
}

/// Format reported by a backend once its device is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFormat {
    pub device_name: String,
    /// Native device rate before resampling
    pub device_sample_rate: u32,
    /// Native device channel count before downmixing
    pub device_channels: u16,
}

/// Receives mono `f32` samples in [-1.0, 1.0] at the target rate.
///
/// Called from whatever thread the backend drives its device on; block length
/// is whatever the device delivers.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Lifecycle signals raised by a running capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The device reported a stream error; capture should be torn down
    DeviceError(String),
    /// A finite source (file replay) has delivered all of its samples
    SourceEnded,
}

pub type CaptureEventSender = mpsc::UnboundedSender<CaptureEvent>;

/// Audio capture backend trait
///
/// Implementations:
/// - cpal: default or named microphone (all platforms)
/// - File: paced WAV replay (demos, headless runs)
#[async_trait::async_trait]
pub trait AudioBackend: Send {
    /// Open the device and start delivering samples to `on_samples`.
    ///
    /// On error nothing is left running.
    async fn start(
        &mut self,
        on_samples: SampleCallback,
        events: CaptureEventSender,
    ) -> Result<InputFormat, CaptureError>;

    /// Release the device. No callback fires once this returns.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input (all platforms)
    Microphone,
    /// WAV file replayed at real-time pace
    File(PathBuf),
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Box<dyn AudioBackend> {
        match source {
            AudioSource::Microphone => Box::new(super::cpal_backend::CpalBackend::new(config)),
            AudioSource::File(path) => Box::new(super::file::FileBackend::new(path, config)),
        }
    }
}
