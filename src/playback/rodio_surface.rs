// Speaker playback using rodio
//
// rodio's OutputStream must stay on the thread that opened it, so a dedicated
// playback thread owns the output and receives clips over a channel.

use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, info, warn};

use super::controller::{AudioClip, PlaybackSurface};
use crate::error::PlaybackError;

enum PlayerCommand {
    Play(Arc<AudioClip>),
    Stop,
}

pub struct RodioSurface {
    tx: Option<std_mpsc::Sender<PlayerCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl RodioSurface {
    /// Start the playback thread. The device opens lazily on the first clip.
    pub fn new(output_device: Option<String>) -> Result<Self> {
        let (tx, rx) = std_mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("reply-playback".into())
            .spawn(move || run_player(output_device, rx))
            .context("Failed to spawn playback thread")?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }
}

impl PlaybackSurface for RodioSurface {
    fn play(&mut self, clip: Arc<AudioClip>) -> Result<(), PlaybackError> {
        self.tx
            .as_ref()
            .ok_or_else(|| PlaybackError::Output("playback thread stopped".into()))?
            .send(PlayerCommand::Play(clip))
            .map_err(|_| PlaybackError::Output("playback thread stopped".into()))
    }

    fn stop(&mut self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(PlayerCommand::Stop);
        }
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

impl Drop for RodioSurface {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_player(output_device: Option<String>, rx: std_mpsc::Receiver<PlayerCommand>) {
    let mut output: Option<(OutputStream, OutputStreamHandle)> = None;
    let mut sink: Option<Sink> = None;

    while let Ok(command) = rx.recv() {
        match command {
            PlayerCommand::Play(clip) => {
                if let Some(previous) = sink.take() {
                    previous.stop();
                }

                if output.is_none() {
                    match open_output(output_device.as_deref()) {
                        Ok(opened) => output = Some(opened),
                        Err(e) => {
                            warn!("Audio output unavailable, skipping reply: {:#}", e);
                            continue;
                        }
                    }
                }
                let Some((_, handle)) = output.as_ref() else {
                    continue;
                };

                match start_clip(handle, &clip) {
                    Ok(new_sink) => {
                        debug!("Playing reply {}", clip.id);
                        sink = Some(new_sink);
                    }
                    Err(e) => warn!("Failed to play reply {}: {:#}", clip.id, e),
                }
            }
            PlayerCommand::Stop => {
                if let Some(previous) = sink.take() {
                    previous.stop();
                }
            }
        }
    }

    debug!("Playback thread exiting");
}

fn open_output(device_name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle)> {
    if let Some(wanted) = device_name.filter(|n| !n.is_empty()) {
        let host = rodio::cpal::default_host();
        let device = host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));

        match device {
            Some(device) => {
                info!("Using output device: {}", wanted);
                return OutputStream::try_from_device(&device)
                    .with_context(|| format!("Failed to open output device '{}'", wanted));
            }
            None => warn!("Output device '{}' not found, using default", wanted),
        }
    }

    OutputStream::try_default().context("Failed to open default output device")
}

fn start_clip(handle: &OutputStreamHandle, clip: &AudioClip) -> Result<Sink> {
    let sink = Sink::try_new(handle).context("Failed to create sink")?;
    let source =
        Decoder::new(Cursor::new(clip.bytes.clone())).context("Failed to decode reply audio")?;
    sink.append(source);
    Ok(sink)
}
