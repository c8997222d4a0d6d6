//! Reply audio: base64 payload -> revocable handle -> speaker.

pub mod controller;
pub mod rodio_surface;

pub use controller::{
    AudioClip, AudioRegistry, AutoplayOutcome, ClipInfo, PlayableAudioHandle, PlaybackController,
    PlaybackSurface,
};
pub use rodio_surface::RodioSurface;
