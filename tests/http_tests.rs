// Tests for the HTTP control API

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{dead_url, ManualMic, TestServer};
use serde_json::Value;
use tower::ServiceExt;
use voice_chat_client::connection::ConnectionConfig;
use voice_chat_client::{create_router, AppState, Session, SessionConfig, SessionHandle};

fn spawn_session(url: &str, mic: &ManualMic) -> SessionHandle {
    let config = SessionConfig {
        connection: ConnectionConfig {
            url: url.to_string(),
            outbound_capacity: 32,
            ..ConnectionConfig::default()
        },
        connect_on_start: false,
        ..SessionConfig::default()
    };
    let (session, handle) = Session::new(config, mic.backend());
    tokio::spawn(session.run());
    handle
}

async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let router = create_router(AppState::new(spawn_session(&dead_url().await, &ManualMic::new())));

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_session_snapshot() {
    let router = create_router(AppState::new(spawn_session(&dead_url().await, &ManualMic::new())));

    let (status, body) = call(&router, "GET", "/session").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connection"]["state"], "disconnected");
    assert_eq!(body["mode"], "idle");
    assert_eq!(body["phase"], "awaiting_speech");
}

#[tokio::test]
async fn test_listen_requires_connection() {
    let mic = ManualMic::new();
    let router = create_router(AppState::new(spawn_session(&dead_url().await, &mic)));

    let (status, body) = call(&router, "POST", "/session/listen/start").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("not connected"));
    assert_eq!(mic.starts(), 0);
}

#[tokio::test]
async fn test_connect_failure_is_unavailable() {
    let router = create_router(AppState::new(spawn_session(&dead_url().await, &ManualMic::new())));

    let (status, _) = call(&router, "POST", "/session/connect").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_connect_listen_and_stop() {
    let mut server = TestServer::start().await;
    let mic = ManualMic::new();
    let router = create_router(AppState::new(spawn_session(&server.url, &mic)));

    let (status, body) = call(&router, "POST", "/session/connect").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    let _conn = server.accept().await;

    let (status, _) = call(&router, "POST", "/session/connect").await;
    assert_eq!(status, StatusCode::CONFLICT, "Already connected");

    let (status, body) = call(&router, "POST", "/session/listen/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["input"]["device_name"], "manual");

    let (status, _) = call(&router, "POST", "/session/listen/start").await;
    assert_eq!(status, StatusCode::CONFLICT, "Already listening");

    let (status, body) = call(&router, "GET", "/session/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["listening"], true);

    let (status, _) = call(&router, "POST", "/session/listen/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!mic.is_open());

    let (status, _) = call(&router, "POST", "/session/disconnect").await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&router, "GET", "/session").await;
    assert_eq!(body["connection"]["state"], "disconnected");
}
