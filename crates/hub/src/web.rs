use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use irrigation_engine::service::Command;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/service", post(api_service))
        .with_state(state)
}

async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    Json(st.to_status())
}

/// Queue a service call; it is applied at the top of the next tick.
async fn api_service(
    State(state): State<SharedState>,
    Json(command): Json<Command>,
) -> impl IntoResponse {
    let name = command.name();
    let target = command.target().kind();
    let mut st = state.write().await;
    st.submit(command);
    info!(command = name, kind = target, "service call queued");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "queued": name, "pending": st.pending.len() })),
    )
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: SharedState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web api listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn shared() -> SharedState {
        Arc::new(RwLock::new(SystemState::new(
            &["garden".to_string(), "garden/lawn".to_string()],
            &[],
        )))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_returns_switches() {
        let resp = router(shared())
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert_eq!(v["switches"]["garden/lawn"]["on"], false);
        assert_eq!(v["pending"], 0);
        assert!(v["irrigation"].is_null());
    }

    #[tokio::test]
    async fn service_call_is_queued() {
        let state = shared();
        let resp = router(Arc::clone(&state))
            .oneshot(post_json(
                "/api/service",
                r#"{"command": "manual_run", "target": {"controller": 0, "zone": "lawn"}, "time": "0:10"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let v = body_json(resp).await;
        assert_eq!(v["queued"], "manual_run");
        assert_eq!(v["pending"], 1);
        assert_eq!(state.read().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn malformed_service_call_is_rejected() {
        let state = shared();
        let resp = router(Arc::clone(&state))
            .oneshot(post_json("/api/service", r#"{"command": "explode"}"#))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        assert!(state.read().await.pending.is_empty());
    }
}
