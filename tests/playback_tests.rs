// Tests for reply audio decoding, autoplay and handle lifetime

mod common;

use base64::Engine;
use common::{tts_payload, RecordingSurface};
use voice_chat_client::connection::REPLY_MEDIA_TYPE;
use voice_chat_client::error::PlaybackError;
use voice_chat_client::playback::{AudioRegistry, AutoplayOutcome, PlaybackController};

#[test]
fn test_load_creates_resolvable_handle() {
    let registry = AudioRegistry::new();
    let mut playback = PlaybackController::new(registry.clone(), true);

    let handle = playback.load(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();

    assert!(handle.uri.starts_with("audio://"));
    assert_eq!(handle.media_type, "audio/wav");
    let info = handle.info.expect("WAV header should parse");
    assert_eq!(info.sample_rate, 16000);
    assert_eq!(info.channels, 1);
    assert!((info.duration_secs - 0.1).abs() < 1e-9);

    let clip = registry.resolve_uri(&handle.uri).expect("handle is live");
    assert_eq!(clip.bytes.len(), handle.byte_len);
    assert_eq!(playback.current(), Some(&handle));
}

#[test]
fn test_present_autoplays_on_surface() {
    let mut playback = PlaybackController::new(AudioRegistry::new(), true);
    let (surface, probe) = RecordingSurface::new();
    playback.attach(surface);

    let (handle, outcome) = playback.present(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();

    assert_eq!(outcome, AutoplayOutcome::Started);
    let played = probe.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].id, handle.id);
}

#[test]
fn test_autoplay_without_surface_is_tolerated() {
    let mut playback = PlaybackController::new(AudioRegistry::new(), true);

    let (_handle, outcome) = playback.present(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();

    assert_eq!(outcome, AutoplayOutcome::NoSurface);
    assert!(playback.current().is_some(), "Handle stays available");
}

#[test]
fn test_failed_autoplay_is_not_retried() {
    let mut playback = PlaybackController::new(AudioRegistry::new(), true);
    let (surface, probe) = RecordingSurface::failing();
    playback.attach(surface);

    let (_handle, outcome) = playback.present(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();

    assert!(matches!(outcome, AutoplayOutcome::Failed(_)));
    assert!(probe.played().is_empty());
    assert!(playback.current().is_some());
}

#[test]
fn test_autoplay_disabled() {
    let mut playback = PlaybackController::new(AudioRegistry::new(), false);
    let (surface, probe) = RecordingSurface::new();
    playback.attach(surface);

    let (_handle, outcome) = playback.present(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();

    assert_eq!(outcome, AutoplayOutcome::Disabled);
    assert!(probe.played().is_empty());
}

#[test]
fn test_invalid_base64_creates_no_handle() {
    let registry = AudioRegistry::new();
    let mut playback = PlaybackController::new(registry.clone(), true);

    let result = playback.load("!!! not base64 !!!", REPLY_MEDIA_TYPE);

    assert!(matches!(result, Err(PlaybackError::InvalidBase64(_))));
    assert!(playback.current().is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_empty_payload_rejected() {
    let mut playback = PlaybackController::new(AudioRegistry::new(), true);

    assert_eq!(
        playback.load("", REPLY_MEDIA_TYPE),
        Err(PlaybackError::EmptyPayload)
    );
}

#[test]
fn test_non_wav_payload_still_becomes_handle() {
    let mut playback = PlaybackController::new(AudioRegistry::new(), true);
    let payload = base64::engine::general_purpose::STANDARD.encode(b"not a wav file");

    let handle = playback.load(&payload, REPLY_MEDIA_TYPE).unwrap();

    assert_eq!(handle.info, None);
    assert_eq!(handle.byte_len, 14);
}

#[test]
fn test_handle_count_does_not_grow_across_turns() {
    let registry = AudioRegistry::new();
    let mut playback = PlaybackController::new(registry.clone(), true);
    let (surface, probe) = RecordingSurface::new();
    playback.attach(surface);

    let mut previous = None;
    for _ in 0..25 {
        let (handle, _) = playback.present(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();
        assert_eq!(registry.len(), 1);

        if let Some(previous) = previous.replace(handle.clone()) {
            assert!(registry.resolve(&previous).is_none(), "Superseded handle revoked");
        }
    }

    assert_eq!(probe.played().len(), 25);
    assert_eq!(probe.stops(), 24, "Each replacement stops the previous clip");
}

#[test]
fn test_release_revokes_current() {
    let registry = AudioRegistry::new();
    let mut playback = PlaybackController::new(registry.clone(), true);
    let handle = playback.load(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();

    playback.release();
    playback.release();

    assert!(registry.resolve(&handle).is_none());
    assert!(playback.current().is_none());
    assert!(registry.is_empty());
}

#[test]
fn test_drop_releases_handle() {
    let registry = AudioRegistry::new();
    {
        let mut playback = PlaybackController::new(registry.clone(), true);
        playback.load(&tts_payload(), REPLY_MEDIA_TYPE).unwrap();
        assert_eq!(registry.len(), 1);
    }
    assert!(registry.is_empty());
}
