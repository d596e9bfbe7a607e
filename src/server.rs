//! Control HTTP surface.
//!
//! | Method/Path           | Response                         |
//! |-----------------------|----------------------------------|
//! | GET  /health          | `{ok, service}`                  |
//! | GET  /state           | engine state snapshot            |
//! | GET  /events          | server-push stream               |
//! | POST /control/start   | engine state snapshot            |
//! | POST /control/stop    | engine state snapshot            |
//! | POST /control/prompt  | `{accepted:true}` or 400         |
//!
//! `OPTIONS` on any path answers 204; unknown paths answer 404.

use std::future::Future;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::core::Orchestrator;
use crate::domain::{EngineState, LogEvent, LogLevel};

pub const SERVICE_NAME: &str = "nexus-forge-core-engine";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Orchestrator,
    pub bridge: Bridge,
}

/// Build the control router
pub fn router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(current_state))
        .route("/events", get(events))
        .route("/control/start", post(start))
        .route("/control/stop", post(stop))
        .route("/control/prompt", post(inject_prompt))
        .fallback(not_found)
        .layer(middleware::from_fn(preflight))
        .layer(cors(cors_origin))
        .with_state(state)
}

fn cors(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!(origin, "Invalid CORS origin, allowing any");
            layer.allow_origin(Any)
        }
    }
}

/// Answer every `OPTIONS` request before routing
async fn preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(request).await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "service": SERVICE_NAME }))
}

async fn current_state(State(app): State<AppState>) -> Json<EngineState> {
    Json(app.engine.state())
}

async fn events(State(app): State<AppState>) -> impl IntoResponse {
    app.bridge.sse()
}

async fn start(State(app): State<AppState>) -> Json<EngineState> {
    Json(app.engine.start())
}

async fn stop(State(app): State<AppState>) -> Json<EngineState> {
    Json(app.engine.stop())
}

async fn inject_prompt(State(app): State<AppState>, body: Bytes) -> Response {
    let body: Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e))
            }
        }
    };

    let prompt = body
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if prompt.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt is required.");
    }

    app.engine.inject_prompt(prompt);
    Json(json!({ "accepted": true })).into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Bind, optionally start the engine, and serve until `shutdown` resolves.
///
/// On shutdown the engine is stopped and every event stream is closed so
/// the server can drain.
pub async fn serve<F>(config: &ServerConfig, app: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control surface to {}", addr))?;
    let local = listener
        .local_addr()
        .context("Failed to read bound address")?;

    app.engine.bus().log(LogEvent::new(
        "Engine",
        LogLevel::Success,
        format!("Core engine API listening on http://{}", local),
    ));
    if config.auto_start {
        app.engine.start();
    }

    let engine = app.engine.clone();
    let bridge = app.bridge.clone();
    let routes = router(app, &config.cors_origin);

    axum::serve(listener, routes)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down");
            engine.stop();
            bridge.close();
        })
        .await
        .context("Control surface failed")?;

    Ok(())
}
