// Tests for decoding inbound service events

use voice_chat_client::connection::{decode_server_event, ResponsePayload, ServerEvent};
use voice_chat_client::error::ProtocolError;

#[test]
fn test_decode_connection() {
    let event = decode_server_event(r#"{"type":"connection","session_id":"abc"}"#).unwrap();

    assert_eq!(
        event,
        ServerEvent::Connection {
            session_id: "abc".to_string(),
            status: None,
            message: None,
        }
    );
}

#[test]
fn test_decode_connection_with_status() {
    let event = decode_server_event(
        r#"{"type":"connection","session_id":"abc","status":"connected","message":"ready"}"#,
    )
    .unwrap();

    match event {
        ServerEvent::Connection {
            status, message, ..
        } => {
            assert_eq!(status.as_deref(), Some("connected"));
            assert_eq!(message.as_deref(), Some("ready"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_decode_speech_events() {
    assert_eq!(
        decode_server_event(r#"{"type":"speech_start","session_id":"abc","rms":0.12,"threshold":0.02}"#)
            .unwrap(),
        ServerEvent::SpeechStart {
            rms: Some(0.12),
            threshold: Some(0.02),
        }
    );
    assert_eq!(
        decode_server_event(r#"{"type":"speech_active","duration_chunks":7}"#).unwrap(),
        ServerEvent::SpeechActive { duration_chunks: 7 }
    );
    assert_eq!(
        decode_server_event(r#"{"type":"speech_end"}"#).unwrap(),
        ServerEvent::SpeechEnd {
            speech_chunks: None,
            silence_chunks: None,
        }
    );
}

#[test]
fn test_decode_response_fields_optional() {
    let event = decode_server_event(r#"{"type":"response","llm":"hi there"}"#).unwrap();

    assert_eq!(
        event,
        ServerEvent::Response(ResponsePayload {
            stt: None,
            llm: Some("hi there".to_string()),
            tts: None,
            audio_file: None,
        })
    );
}

#[test]
fn test_decode_message_events() {
    assert_eq!(
        decode_server_event(r#"{"type":"processing","message":"Transcribing"}"#).unwrap(),
        ServerEvent::Processing {
            message: "Transcribing".to_string()
        }
    );
    assert_eq!(
        decode_server_event(r#"{"type":"notification","message":"Too short"}"#).unwrap(),
        ServerEvent::Notification {
            message: "Too short".to_string()
        }
    );
    assert_eq!(
        decode_server_event(r#"{"type":"error","message":"boom"}"#).unwrap(),
        ServerEvent::Error {
            message: "boom".to_string()
        }
    );
}

#[test]
fn test_unknown_type_is_not_an_error() {
    let event = decode_server_event(r#"{"type":"heartbeat","n":1}"#).unwrap();

    assert_eq!(
        event,
        ServerEvent::Unknown {
            event_type: "heartbeat".to_string()
        }
    );
    assert_eq!(event.kind(), "heartbeat");
}

#[test]
fn test_malformed_json_rejected() {
    assert!(matches!(
        decode_server_event("not json"),
        Err(ProtocolError::MalformedJson(_))
    ));
    assert!(matches!(
        decode_server_event(r#"{"type":"response""#),
        Err(ProtocolError::MalformedJson(_))
    ));
}

#[test]
fn test_missing_type_rejected() {
    assert_eq!(
        decode_server_event(r#"{"message":"hello"}"#),
        Err(ProtocolError::MissingType)
    );
    assert_eq!(
        decode_server_event(r#"{"type":5}"#),
        Err(ProtocolError::MissingType)
    );
    assert_eq!(decode_server_event("[]"), Err(ProtocolError::MissingType));
}

#[test]
fn test_invalid_field_rejected() {
    let err = decode_server_event(r#"{"type":"speech_active","duration_chunks":"many"}"#)
        .unwrap_err();

    match err {
        ProtocolError::InvalidField { event, .. } => assert_eq!(event, "speech_active"),
        other => panic!("unexpected error {:?}", other),
    }
}
