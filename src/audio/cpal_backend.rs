// Microphone backend using cpal
//
// cpal streams are not Send on every host, so the stream lives on a dedicated
// capture thread for its whole life. The async side only exchanges a ready
// signal and a stop signal with that thread.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::backend::{
    AudioBackend, AudioBackendConfig, CaptureEvent, CaptureEventSender, InputFormat,
    SampleCallback,
};
use super::resample::InputNormalizer;
use crate::error::CaptureError;

/// cpal microphone backend
pub struct CpalBackend {
    config: AudioBackendConfig,
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl CpalBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    async fn start(
        &mut self,
        on_samples: SampleCallback,
        events: CaptureEventSender,
    ) -> Result<InputFormat, CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || run_capture_thread(config, on_samples, events, ready_tx, stop_rx))
            .map_err(|e| CaptureError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        let format = match ready_rx.await {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(CaptureError::DeviceUnavailable(
                    "capture thread exited before the device opened".into(),
                ));
            }
        };

        info!(
            "Microphone open: {} ({}Hz, {} channels -> {}Hz mono)",
            format.device_name,
            format.device_sample_rate,
            format.device_channels,
            self.config.target_sample_rate
        );

        self.worker = Some(CaptureWorker { stop_tx, handle });
        Ok(format)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        info!("Releasing microphone");
        let _ = worker.stop_tx.send(());

        tokio::task::spawn_blocking(move || worker.handle.join())
            .await
            .context("Failed to join capture thread")?
            .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?;

        info!("Microphone released");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn run_capture_thread(
    config: AudioBackendConfig,
    on_samples: SampleCallback,
    events: CaptureEventSender,
    ready_tx: oneshot::Sender<Result<InputFormat, CaptureError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match open_input_stream(&config, on_samples, events) {
        Ok((stream, format)) => {
            let _ = ready_tx.send(Ok(format));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Blocks until stop() or until the backend is dropped
    let _ = stop_rx.recv();

    // Device first, then the callback graph, then the thread itself
    if let Err(e) = stream.pause() {
        warn!("Failed to pause input stream: {}", e);
    }
    drop(stream);
    debug!("Capture thread exiting");
}

fn open_input_stream(
    config: &AudioBackendConfig,
    on_samples: SampleCallback,
    events: CaptureEventSender,
) -> Result<(cpal::Stream, InputFormat), CaptureError> {
    let host = cpal::default_host();
    let device = select_input_device(&host, config.input_device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "unknown device".into());

    let supported = device
        .default_input_config()
        .map_err(|e| classify_device_message(e.to_string()))?;

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();
    let format = InputFormat {
        device_name,
        device_sample_rate: stream_config.sample_rate.0,
        device_channels: stream_config.channels,
    };

    let normalizer = InputNormalizer::new(
        stream_config.channels,
        stream_config.sample_rate.0,
        config.target_sample_rate,
    )?;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, normalizer, on_samples, events)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, normalizer, on_samples, events)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, normalizer, on_samples, events)
        }
        cpal::SampleFormat::I32 => {
            build_stream::<i32>(&device, &stream_config, normalizer, on_samples, events)
        }
        other => {
            return Err(CaptureError::UnsupportedFormat(format!(
                "sample format {:?}",
                other
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| classify_device_message(e.to_string()))?;

    Ok((stream, format))
}

fn select_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    match name.filter(|n| !n.is_empty()) {
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| classify_device_message(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("no input device named '{}'", wanted))
                })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into())),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut normalizer: InputNormalizer,
    mut on_samples: SampleCallback,
    events: CaptureEventSender,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
                let mono = normalizer.process(&scratch);
                if !mono.is_empty() {
                    on_samples(mono);
                }
            },
            move |err| {
                error!("Input stream error: {}", err);
                let _ = events.send(CaptureEvent::DeviceError(err.to_string()));
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable("device disappeared while opening".into())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                CaptureError::UnsupportedFormat(format!("{:?}", config))
            }
            other => classify_device_message(other.to_string()),
        })
}

/// Map a host error message onto the device error taxonomy.
///
/// Hosts report permission problems only as backend-specific text.
pub fn classify_device_message(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not authorized", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle));

    if denied {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

/// An audio device as listed by the `devices` command
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
}

pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .context("Failed to enumerate input devices")?;

    Ok(collect_devices(devices, default_name))
}

pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .context("Failed to enumerate output devices")?;

    Ok(collect_devices(devices, default_name))
}

fn collect_devices(
    devices: impl Iterator<Item = cpal::Device>,
    default_name: Option<String>,
) -> Vec<DeviceInfo> {
    devices
        .filter_map(|d| d.name().ok())
        .map(|name| DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        })
        .collect()
}
