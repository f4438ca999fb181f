//! Control HTTP Server for JXR Cleaner
//!
//! Local endpoints standing in for the tray menu: status, "force run now" and exit.
//! Binding the listen address doubles as the single-instance check.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::context::SchedulerContext;
use crate::force_scan::force_scan;
use crate::metrics::StatusSnapshot;

/// Errors that can occur when running the control server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Another daemon already owns the control address.
    #[error("Another instance is already listening on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] io::Error),
}

/// State shared by the control handlers
#[derive(Clone)]
pub struct ControlState {
    pub ctx: Arc<SchedulerContext>,
    pub root: PathBuf,
}

/// Body of `POST /force-scan`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForceScanResponse {
    pub queued: usize,
}

/// Body of `POST /shutdown`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownResponse {
    pub status: String,
}

/// Handler for GET /status endpoint
async fn get_status(State(state): State<ControlState>) -> Json<StatusSnapshot> {
    Json(StatusSnapshot::collect(&state.ctx))
}

/// Handler for POST /force-scan endpoint
/// Runs the sweep on a blocking thread and returns how many files were queued
async fn post_force_scan(
    State(state): State<ControlState>,
) -> Result<Json<ForceScanResponse>, StatusCode> {
    if state.ctx.is_shutting_down() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let ControlState { ctx, root } = state;
    let queued = tokio::task::spawn_blocking(move || force_scan(&ctx, &root))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(ForceScanResponse { queued }))
}

/// Handler for POST /shutdown endpoint
async fn post_shutdown(State(state): State<ControlState>) -> (StatusCode, Json<ShutdownResponse>) {
    info!("shutdown requested over control server");
    state.ctx.shutdown();
    (
        StatusCode::ACCEPTED,
        Json(ShutdownResponse {
            status: "shutting_down".to_string(),
        }),
    )
}

/// Creates the axum Router with control endpoints
pub fn create_control_router(state: ControlState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/force-scan", post(post_force_scan))
        .route("/shutdown", post(post_shutdown))
        .with_state(state)
}

/// Binds the control address.
///
/// An address already in use means another daemon is running.
pub async fn bind_control_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == io::ErrorKind::AddrInUse {
            ServerError::AlreadyRunning(addr)
        } else {
            ServerError::BindError(e)
        }
    })
}

/// Serves the control endpoints until the scheduler shuts down
pub async fn run_control_server(listener: TcpListener, state: ControlState) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control server listening");
    }

    let shutdown = state.ctx.shutdown_token().clone();
    let app = create_control_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| {
            warn!(error = %e, "control server stopped with error");
            ServerError::BindError(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ExtensionRule;
    use axum::body::Body;
    use axum::http::Request;
    use std::fs::File;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state(root: PathBuf) -> ControlState {
        ControlState {
            ctx: Arc::new(SchedulerContext::new(ExtensionRule::new("jxr", "jpg"))),
            root,
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).expect("response should be valid JSON")
    }

    #[tokio::test]
    async fn test_get_status_returns_json() {
        let state = state(PathBuf::from("/captures"));
        state.ctx.queue.push(PathBuf::from("/captures/a.jxr"));
        let app = create_control_router(state);

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .expect("should have content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let snapshot: StatusSnapshot = body_json(response).await;
        assert_eq!(snapshot.queue_len, 1);
        assert!(!snapshot.force_run_active);
    }

    #[tokio::test]
    async fn test_force_scan_queues_files() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("a.jxr")).unwrap();
        File::create(temp_dir.path().join("b.jxr")).unwrap();
        File::create(temp_dir.path().join("b.jpg")).unwrap();

        let state = state(temp_dir.path().to_path_buf());
        let ctx = state.ctx.clone();
        let app = create_control_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/force-scan")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: ForceScanResponse = body_json(response).await;
        assert_eq!(body, ForceScanResponse { queued: 1 });
        assert!(ctx.force_run_active());
        assert_eq!(ctx.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_force_scan_rejected_during_shutdown() {
        let state = state(PathBuf::from("/captures"));
        state.ctx.shutdown();
        let app = create_control_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/force-scan")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_shutdown_signals_context() {
        let state = state(PathBuf::from("/captures"));
        let ctx = state.ctx.clone();
        let app = create_control_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/shutdown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: ShutdownResponse = body_json(response).await;
        assert_eq!(body.status, "shutting_down");
        assert!(ctx.is_shutting_down());
    }

    #[tokio::test]
    async fn test_status_rejects_post() {
        let app = create_control_router(state(PathBuf::from("/captures")));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_second_bind_reports_already_running() {
        let first = bind_control_listener(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();

        let second = bind_control_listener(addr).await;
        assert!(matches!(second, Err(ServerError::AlreadyRunning(a)) if a == addr));
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let listener = bind_control_listener(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let state = state(PathBuf::from("/captures"));
        let ctx = state.ctx.clone();
        let handle = tokio::spawn(run_control_server(listener, state));

        ctx.shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server should stop after shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}
