// Shared fixtures for integration tests
//
// - ManualMic: an in-memory microphone the test pushes samples into
// - RecordingSink / RecordingSurface: capture what the pipeline and player receive
// - TestServer: a loopback websocket server speaking the voice protocol
// - WAV helpers built with hound

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use voice_chat_client::audio::{
    AudioBackend, AudioFrame, CaptureEvent, CaptureEventSender, FrameSink, InputFormat,
    SampleCallback, SendOutcome,
};
use voice_chat_client::error::{CaptureError, PlaybackError};
use voice_chat_client::playback::{AudioClip, PlaybackSurface};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test if it takes longer than `TIMEOUT`
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, fut)
        .await
        .expect("timed out waiting")
}

// ============================================================================
// Microphone
// ============================================================================

#[derive(Default)]
struct MicShared {
    callback: Option<SampleCallback>,
    events: Option<CaptureEventSender>,
    starts: usize,
    stops: usize,
    fail_next: Option<CaptureError>,
}

/// Test-side handle to a `ManualBackend`
#[derive(Clone, Default)]
pub struct ManualMic {
    shared: Arc<Mutex<MicShared>>,
}

impl ManualMic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(&self) -> Box<dyn AudioBackend> {
        Box::new(ManualBackend { mic: self.clone() })
    }

    pub fn fail_next_start(&self, error: CaptureError) {
        self.shared.lock().unwrap().fail_next = Some(error);
    }

    /// Deliver samples as the device would; false if the device is closed
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut shared = self.shared.lock().unwrap();
        match shared.callback.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn raise_device_error(&self, message: &str) {
        let shared = self.shared.lock().unwrap();
        if let Some(events) = &shared.events {
            let _ = events.send(CaptureEvent::DeviceError(message.to_string()));
        }
    }

    /// The event channel handed to the backend by the current run
    pub fn event_sender(&self) -> Option<CaptureEventSender> {
        self.shared.lock().unwrap().events.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().unwrap().callback.is_some()
    }

    pub fn starts(&self) -> usize {
        self.shared.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.shared.lock().unwrap().stops
    }
}

pub struct ManualBackend {
    mic: ManualMic,
}

#[async_trait::async_trait]
impl AudioBackend for ManualBackend {
    async fn start(
        &mut self,
        on_samples: SampleCallback,
        events: CaptureEventSender,
    ) -> Result<InputFormat, CaptureError> {
        let mut shared = self.mic.shared.lock().unwrap();
        if let Some(error) = shared.fail_next.take() {
            return Err(error);
        }
        shared.starts += 1;
        shared.callback = Some(on_samples);
        shared.events = Some(events);

        Ok(InputFormat {
            device_name: "manual".to_string(),
            device_sample_rate: 16000,
            device_channels: 1,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        let mut shared = self.mic.shared.lock().unwrap();
        shared.stops += 1;
        shared.callback = None;
        shared.events = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.mic.is_open()
    }

    fn name(&self) -> &str {
        "manual"
    }
}

// ============================================================================
// Frame sink
// ============================================================================

/// Collects frames; answers every send with a fixed outcome
pub struct RecordingSink {
    frames: Mutex<Vec<AudioFrame>>,
    outcome: Mutex<SendOutcome>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Self::with_outcome(SendOutcome::Sent)
    }

    pub fn with_outcome(outcome: SendOutcome) -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
            outcome: Mutex::new(outcome),
        })
    }

    pub fn set_outcome(&self, outcome: SendOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn frames(&self) -> Vec<AudioFrame> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for RecordingSink {
    fn send_frame(&self, frame: AudioFrame) -> SendOutcome {
        let outcome = *self.outcome.lock().unwrap();
        if outcome == SendOutcome::Sent {
            self.frames.lock().unwrap().push(frame);
        }
        outcome
    }
}

// ============================================================================
// Playback surface
// ============================================================================

/// What a `RecordingSurface` was asked to do
#[derive(Clone, Default)]
pub struct SurfaceProbe {
    played: Arc<Mutex<Vec<Arc<AudioClip>>>>,
    stops: Arc<AtomicUsize>,
}

impl SurfaceProbe {
    pub fn played(&self) -> Vec<Arc<AudioClip>> {
        self.played.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

pub struct RecordingSurface {
    probe: SurfaceProbe,
    fail: bool,
}

impl RecordingSurface {
    pub fn new() -> (Box<dyn PlaybackSurface>, SurfaceProbe) {
        let probe = SurfaceProbe::default();
        let surface = Box::new(Self {
            probe: probe.clone(),
            fail: false,
        });
        (surface, probe)
    }

    /// A surface that refuses to play, like a blocked autoplay
    pub fn failing() -> (Box<dyn PlaybackSurface>, SurfaceProbe) {
        let probe = SurfaceProbe::default();
        let surface = Box::new(Self {
            probe: probe.clone(),
            fail: true,
        });
        (surface, probe)
    }
}

impl PlaybackSurface for RecordingSurface {
    fn play(&mut self, clip: Arc<AudioClip>) -> Result<(), PlaybackError> {
        if self.fail {
            return Err(PlaybackError::Output("autoplay blocked".into()));
        }
        self.probe.played.lock().unwrap().push(clip);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Loopback voice service
// ============================================================================

/// One accepted client connection, seen from the service side
pub struct ServerConn {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ServerConn {
    pub fn send_json(&self, value: Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.tx.send(Message::Text(text.to_string()));
    }

    /// Start the close handshake from the service side
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    /// Next binary frame from the client; `None` once the client is gone
    pub async fn recv_binary(&mut self) -> Option<Vec<u8>> {
        loop {
            match within(self.rx.recv()).await? {
                Message::Binary(data) => return Some(data),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// True if no binary frame arrives within `wait`
    pub async fn no_binary_within(&mut self, wait: Duration) -> bool {
        let quiet = async {
            loop {
                match self.rx.recv().await {
                    Some(Message::Binary(_)) => return false,
                    Some(_) => continue,
                    None => return true,
                }
            }
        };
        tokio::time::timeout(wait, quiet).await.unwrap_or(true)
    }
}

pub struct TestServer {
    pub url: String,
    connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel::<Message>();
                let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
                let _ = conn_tx.send(ServerConn {
                    tx: to_client_tx,
                    rx: from_client_rx,
                });

                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            outgoing = to_client_rx.recv() => match outgoing {
                                Some(message) => {
                                    if sink.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            incoming = stream.next() => match incoming {
                                Some(Ok(message)) => {
                                    let _ = from_client_tx.send(message);
                                }
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        Self { url, connections }
    }

    pub async fn accept(&mut self) -> ServerConn {
        within(self.connections.recv())
            .await
            .expect("server stopped")
    }
}

/// A ws:// url nothing listens on
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws", addr)
}

/// A ws:// url whose listener accepts TCP but never answers the handshake
pub async fn silent_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("ws://{}/ws", addr)
}

// ============================================================================
// WAV helpers
// ============================================================================

fn wav_spec(sample_rate: u32, channels: u16) -> hound::WavSpec {
    hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// A 16-bit WAV file in memory
pub fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate, channels)).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate, channels)).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Base64 of a short 16 kHz mono reply, as carried in `response.tts`
pub fn tts_payload() -> String {
    let samples: Vec<i16> = (0..1600).map(|i| ((i % 100) * 100) as i16).collect();
    base64::engine::general_purpose::STANDARD.encode(wav_bytes(16000, 1, &samples))
}
