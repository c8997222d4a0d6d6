use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PlaybackError;

/// Decoded reply audio
#[derive(Debug)]
pub struct AudioClip {
    pub id: Uuid,
    pub media_type: String,
    pub bytes: Vec<u8>,
    pub info: Option<ClipInfo>,
}

/// Format details read from a WAV header
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
}

impl ClipInfo {
    /// Inspect a WAV payload; `None` if the header does not parse
    pub fn from_wav(bytes: &[u8]) -> Option<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
        let spec = reader.spec();
        let frames = reader.duration();

        Some(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            duration_secs: if spec.sample_rate == 0 {
                0.0
            } else {
                frames as f64 / spec.sample_rate as f64
            },
        })
    }
}

/// Revocable reference to a registered clip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayableAudioHandle {
    pub id: Uuid,
    pub uri: String,
    pub media_type: String,
    pub byte_len: usize,
    pub info: Option<ClipInfo>,
}

/// Clips addressable by URI until revoked
#[derive(Debug, Clone, Default)]
pub struct AudioRegistry {
    clips: Arc<Mutex<HashMap<Uuid, Arc<AudioClip>>>>,
}

impl AudioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn clips(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AudioClip>>> {
        self.clips.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, clip: AudioClip) -> PlayableAudioHandle {
        let handle = PlayableAudioHandle {
            id: clip.id,
            uri: format!("audio://{}", clip.id),
            media_type: clip.media_type.clone(),
            byte_len: clip.bytes.len(),
            info: clip.info,
        };
        self.clips().insert(clip.id, Arc::new(clip));
        handle
    }

    pub fn resolve(&self, handle: &PlayableAudioHandle) -> Option<Arc<AudioClip>> {
        self.clips().get(&handle.id).cloned()
    }

    pub fn resolve_uri(&self, uri: &str) -> Option<Arc<AudioClip>> {
        let id = uri.strip_prefix("audio://")?.parse::<Uuid>().ok()?;
        self.clips().get(&id).cloned()
    }

    /// Returns whether the handle was still registered
    pub fn revoke(&self, handle: &PlayableAudioHandle) -> bool {
        self.clips().remove(&handle.id).is_some()
    }

    /// Live handles
    pub fn len(&self) -> usize {
        self.clips().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips().is_empty()
    }
}

/// Where decoded clips get played
pub trait PlaybackSurface: Send {
    /// Begin playing `clip`, replacing whatever is playing. Must not block.
    fn play(&mut self, clip: Arc<AudioClip>) -> Result<(), PlaybackError>;

    /// Stop current playback
    fn stop(&mut self) {}

    fn name(&self) -> &str;
}

/// Outcome of an autoplay attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoplayOutcome {
    Started,
    Disabled,
    /// No surface attached yet; not retried
    NoSurface,
    /// The surface refused; logged, not retried
    Failed(String),
}

/// Decodes reply payloads into handles and triggers playback.
///
/// Holds at most one live handle: each new reply revokes the previous one.
pub struct PlaybackController {
    registry: AudioRegistry,
    surface: Option<Box<dyn PlaybackSurface>>,
    current: Option<PlayableAudioHandle>,
    autoplay: bool,
}

impl PlaybackController {
    pub fn new(registry: AudioRegistry, autoplay: bool) -> Self {
        Self {
            registry,
            surface: None,
            current: None,
            autoplay,
        }
    }

    pub fn attach(&mut self, surface: Box<dyn PlaybackSurface>) {
        info!("Playback surface attached: {}", surface.name());
        self.surface = Some(surface);
    }

    pub fn registry(&self) -> &AudioRegistry {
        &self.registry
    }

    pub fn current(&self) -> Option<&PlayableAudioHandle> {
        self.current.as_ref()
    }

    /// Decode a base64 payload and make it the current handle
    pub fn load(
        &mut self,
        audio_base64: &str,
        media_type: &str,
    ) -> Result<PlayableAudioHandle, PlaybackError> {
        // The new turn supersedes the old audio whether or not this decode succeeds
        self.release();

        let compact: String = audio_base64
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| PlaybackError::InvalidBase64(e.to_string()))?;
        if bytes.is_empty() {
            return Err(PlaybackError::EmptyPayload);
        }

        let info = ClipInfo::from_wav(&bytes);
        match &info {
            Some(info) => debug!(
                "Reply audio: {} bytes, {}Hz, {} ch, {:.2}s",
                bytes.len(),
                info.sample_rate,
                info.channels,
                info.duration_secs
            ),
            None => warn!(
                "Reply audio ({} bytes) has no readable WAV header; playback may fail",
                bytes.len()
            ),
        }

        let handle = self.registry.register(AudioClip {
            id: Uuid::new_v4(),
            media_type: media_type.to_string(),
            bytes,
            info,
        });
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// `load` followed by an autoplay attempt
    pub fn present(
        &mut self,
        audio_base64: &str,
        media_type: &str,
    ) -> Result<(PlayableAudioHandle, AutoplayOutcome), PlaybackError> {
        let handle = self.load(audio_base64, media_type)?;
        let outcome = self.autoplay_current();
        Ok((handle, outcome))
    }

    /// Try once to play the current handle
    pub fn autoplay_current(&mut self) -> AutoplayOutcome {
        if !self.autoplay {
            return AutoplayOutcome::Disabled;
        }
        let Some(handle) = self.current.as_ref() else {
            return AutoplayOutcome::Failed("no reply audio loaded".into());
        };
        let Some(clip) = self.registry.resolve(handle) else {
            return AutoplayOutcome::Failed("reply audio was released".into());
        };
        let Some(surface) = self.surface.as_mut() else {
            info!("No playback surface attached; skipping autoplay");
            return AutoplayOutcome::NoSurface;
        };

        match surface.play(clip) {
            Ok(()) => AutoplayOutcome::Started,
            Err(e) => {
                warn!("Autoplay failed on {}: {}", surface.name(), e);
                AutoplayOutcome::Failed(e.to_string())
            }
        }
    }

    /// Revoke the current handle and stop its playback
    pub fn release(&mut self) {
        if let Some(previous) = self.current.take() {
            self.registry.revoke(&previous);
            if let Some(surface) = self.surface.as_mut() {
                surface.stop();
            }
            debug!("Released reply audio {}", previous.uri);
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.release();
    }
}
