use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{
    AudioBackend, AudioBackendConfig, CaptureEvent, CaptureEventSender, InputFormat,
    SampleCallback,
};
use super::resample::{downmix_to_mono, resample_clip};
use crate::error::CaptureError;

/// A WAV file decoded to normalised float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Int, bits) if (8..=32).contains(&bits) => {
                let full_scale = (1i64 << (bits - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / full_scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
            (format, bits) => anyhow::bail!(
                "Unsupported WAV encoding: {:?} at {} bits",
                format,
                bits
            ),
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Mono samples at `target_rate`, ready for the capture pipeline
    pub fn to_mono(&self, target_rate: u32) -> Result<Vec<f32>, CaptureError> {
        let mono = downmix_to_mono(&self.samples, self.channels);
        resample_clip(&mono, self.sample_rate, target_rate)
    }
}

/// Replays a WAV file as if it were a live microphone.
///
/// Samples are delivered in `buffer_duration_ms` chunks, one chunk per
/// chunk-duration of wall time.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    pace: Option<Duration>,
    task: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        let pace = Duration::from_millis(config.buffer_duration_ms);
        Self {
            path: path.into(),
            config,
            pace: Some(pace).filter(|p| !p.is_zero()),
            task: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver chunks as fast as the runtime allows
    pub fn unpaced(mut self) -> Self {
        self.pace = None;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(
        &mut self,
        mut on_samples: SampleCallback,
        events: CaptureEventSender,
    ) -> Result<InputFormat, CaptureError> {
        if self.task.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let file = AudioFile::open(&self.path).map_err(|e| CaptureError::Io(format!("{:#}", e)))?;
        let samples = file.to_mono(self.config.target_sample_rate)?;
        let chunk_len = ((self.config.target_sample_rate as u64 * self.config.buffer_duration_ms)
            / 1000)
            .max(1) as usize;

        let format = InputFormat {
            device_name: file.path.clone(),
            device_sample_rate: file.sample_rate,
            device_channels: file.channels,
        };

        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        let pace = self.pace;

        let task = tokio::spawn(async move {
            for chunk in samples.chunks(chunk_len) {
                match pace {
                    Some(pace) => tokio::time::sleep(pace).await,
                    None => tokio::task::yield_now().await,
                }
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                on_samples(chunk);
            }

            info!("File replay finished");
            let _ = events.send(CaptureEvent::SourceEnded);
        });

        info!(
            "Replaying {} ({:.1}s) as microphone input",
            file.path, file.duration_seconds
        );

        self.task = Some(task);
        Ok(format)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        self.running.store(false, Ordering::SeqCst);
        task.abort();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!("File replay task failed: {}", e);
            }
        }

        info!("File replay stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        "file replay"
    }
}
