//! Control Surface Integration Tests
//!
//! Routes, status codes and bodies of the control HTTP surface, exercised
//! in-process with `oneshot`.

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body, BodyDataStream};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{Harness, ScriptedProvider};
use forge::bridge::Bridge;
use forge::domain::{EngineEvent, LogEvent, LogLevel};
use forge::server::{router, AppState, SERVICE_NAME};

fn app_with_bridge(h: &Harness, heartbeat: Duration) -> (Router, Bridge) {
    let bridge = Bridge::new(heartbeat);
    bridge.attach(&h.bus);
    let app = router(
        AppState {
            engine: h.engine.clone(),
            bridge: bridge.clone(),
        },
        "*",
    );
    (app, bridge)
}

fn app(h: &Harness) -> Router {
    app_with_bridge(h, Duration::from_secs(15)).0
}

/// Splits a server-push body into blank-line terminated frames
struct Frames {
    body: BodyDataStream,
    buf: String,
}

impl Frames {
    fn new(body: BodyDataStream) -> Self {
        Self {
            body,
            buf: String::new(),
        }
    }

    /// Next frame, or `None` once the stream has ended
    async fn next(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let frame: String = self.buf.drain(..end + 2).collect();
                return Some(frame);
            }
            let chunk = tokio::time::timeout(Duration::from_secs(2), self.body.next())
                .await
                .expect("stream stalled")?;
            self.buf
                .push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
    }

    /// Next frame that is not a keep-alive
    async fn next_event(&mut self) -> Option<String> {
        loop {
            let frame = self.next().await?;
            if frame != ": ping\n\n" {
                return Some(frame);
            }
        }
    }
}

async fn call(app: Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));

    let (status, body) = call(app(&h), Method::GET, "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "service": SERVICE_NAME }));
}

#[tokio::test]
async fn test_state_start_and_stop() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));

    let (status, body) = call(app(&h), Method::GET, "/state", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["processing"], false);
    assert_eq!(body["stage"], "idle");

    let (status, body) = call(app(&h), Method::POST, "/control/start", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["stage"], "watching");

    let (status, body) = call(app(&h), Method::POST, "/control/stop", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["stage"], "idle");
}

#[tokio::test]
async fn test_prompt_validation() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));

    let (status, body) = call(app(&h), Method::POST, "/control/prompt", Body::empty()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "prompt is required." }));

    let (status, body) = call(
        app(&h),
        Method::POST,
        "/control/prompt",
        Body::from(r#"{"prompt":"   "}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "prompt is required.");

    let (status, body) = call(app(&h), Method::POST, "/control/prompt", Body::from("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON body: "));
}

#[tokio::test]
async fn test_prompt_injection_runs_pipeline() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));
    h.engine.start();

    let (status, body) = call(
        app(&h),
        Method::POST,
        "/control/prompt",
        Body::from(r#"{"prompt":"  Build a todo app with tags  "}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "accepted": true }));

    h.settle().await;
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(h.marketplace.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_options_and_unknown_paths() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));

    let (status, _) = call(app(&h), Method::OPTIONS, "/control/prompt", Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(app(&h), Method::OPTIONS, "/anything/else", Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(app(&h), Method::GET, "/nope", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Not Found" }));
}

#[tokio::test]
async fn test_cors_headers_present() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));

    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://dashboard.test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_events_opens_stream() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));

    let response = app(&h)
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_events_stream_frames() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir, ScriptedProvider::new("mock"));
    let (app, bridge) = app_with_bridge(&h, Duration::from_millis(100));

    let response = app
        .oneshot(Request::builder().uri("/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = Frames::new(response.into_body().into_data_stream());

    assert_eq!(frames.next().await.as_deref(), Some(": connected\n\n"));

    h.bus.emit(EngineEvent::Log(LogEvent::new(
        "Test",
        LogLevel::Info,
        "hello observers",
    )));
    let frame = frames.next_event().await.unwrap();
    let data = frame
        .strip_prefix("event: engine-log\ndata: ")
        .and_then(|rest| rest.strip_suffix("\n\n"))
        .unwrap_or_else(|| panic!("unexpected frame: {:?}", frame));
    let data: Value = serde_json::from_str(data).unwrap();
    assert_eq!(data["message"], "hello observers");
    assert_eq!(data["source"], "Test");

    // Idle long enough for a heartbeat
    assert_eq!(frames.next().await.as_deref(), Some(": ping\n\n"));

    bridge.close();
    assert_eq!(frames.next().await, None);
}
