//! Audio capture pipeline
//!
//! Owns one `AudioBackend` and forwards its samples, assembled into fixed-size
//! PCM frames, to a `FrameSink` while capture is active.
//!
//! ## Guarantees
//! - Frames go out in capture order, each exactly `block_size` samples long.
//! - A frame the sink refuses is dropped and counted, never queued.
//! - `stop()` closes the forwarding gate before the device is released, so a
//!   device callback still in flight cannot forward anything afterwards.
//! - `start()` while active is rejected; a failed start leaves no state behind.
//! - Device events belong to one run; `start()` discards what an earlier run
//!   left queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{
    AudioBackend, AudioFrame, CaptureEvent, CaptureEventSender, InputFormat, SampleCallback,
};
use super::pcm::{FrameAssembler, DEFAULT_BLOCK_SIZE, SAMPLE_RATE};
use crate::error::CaptureError;

/// Why a frame was not transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No open connection
    NotConnected,
    /// The writer queue is full
    Backpressure,
}

/// Result of handing a frame to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped(DropReason),
}

/// Destination for captured frames.
///
/// Called from the device thread, so implementations must not block.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: AudioFrame) -> SendOutcome;
}

/// Frame pipeline settings
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Samples per frame
    pub block_size: usize,
    /// Rate the backend delivers at
    pub sample_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Counters shared with the device callback
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of `CaptureStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureCounters {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
}

impl CaptureStats {
    fn record(&self, outcome: SendOutcome, bytes: usize) {
        match outcome {
            SendOutcome::Sent => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
            }
            SendOutcome::Dropped(reason) => {
                let dropped = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Dropped audio frame ({:?})", reason);
                if dropped % 100 == 0 {
                    warn!("{} audio frames dropped so far (last: {:?})", dropped, reason);
                }
            }
        }
    }

    pub fn snapshot(&self) -> CaptureCounters {
        CaptureCounters {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

pub struct CapturePipeline {
    backend: Box<dyn AudioBackend>,
    sink: Arc<dyn FrameSink>,
    config: CaptureConfig,
    /// Forwarding gate checked by the device callback
    active: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    /// Channel of the current run; replaced on every start
    events_tx: CaptureEventSender,
    events_rx: mpsc::UnboundedReceiver<CaptureEvent>,
}

impl CapturePipeline {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        sink: Arc<dyn FrameSink>,
        config: CaptureConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            backend,
            sink,
            config,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CaptureStats::default()),
            events_tx,
            events_rx,
        }
    }

    /// Next device event of the current run.
    ///
    /// Pending forever while nothing is raised. Events a previous run queued
    /// are gone once `start()` opens a new run.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events_rx.recv().await
    }

    /// Acquire the input device and begin streaming frames
    pub async fn start(&mut self) -> Result<InputFormat, CaptureError> {
        if self.is_active() {
            warn!("Capture already active; ignoring start");
            return Err(CaptureError::AlreadyCapturing);
        }

        info!(
            "Starting capture via {} ({} samples/frame @ {}Hz)",
            self.backend.name(),
            self.config.block_size,
            self.config.sample_rate
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;

        // Open the gate first so the device's first block is not lost
        self.active.store(true, Ordering::Release);
        let callback = self.frame_callback();

        match self.backend.start(callback, self.events_tx.clone()).await {
            Ok(format) => Ok(format),
            Err(e) => {
                self.active.store(false, Ordering::Release);
                warn!("Capture failed to start: {}", e);
                Err(e)
            }
        }
    }

    /// Release the device; safe to call repeatedly or when never started
    pub async fn stop(&mut self) -> Result<()> {
        let was_active = self.active.swap(false, Ordering::AcqRel);

        if self.backend.is_capturing() {
            self.backend.stop().await?;
        }

        if was_active {
            let counters = self.stats.snapshot();
            info!(
                "Capture stopped ({} frames sent, {} dropped)",
                counters.frames_sent, counters.frames_dropped
            );
        }

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) || self.backend.is_capturing()
    }

    pub fn stats(&self) -> CaptureCounters {
        self.stats.snapshot()
    }

    /// Build the per-run device callback: gate, assemble, encode, hand off.
    ///
    /// Each run gets a fresh assembler, so a partial block from a previous
    /// run is never sent.
    fn frame_callback(&self) -> SampleCallback {
        let active = Arc::clone(&self.active);
        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        let mut assembler = FrameAssembler::new(self.config.block_size, self.config.sample_rate);

        Box::new(move |samples: &[f32]| {
            if !active.load(Ordering::Acquire) {
                return;
            }

            assembler.push(samples, |frame| {
                let bytes = frame.byte_len();
                let outcome = sink.send_frame(frame);
                stats.record(outcome, bytes);
            });
        })
    }
}
