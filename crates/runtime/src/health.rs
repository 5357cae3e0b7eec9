use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, routing::get};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests
    pub status: String,
}

/// Import progress, served as JSON on `GET /progress`.
pub trait ProgressSource: Send + Sync + 'static {
    /// Snapshot of the current progress.
    fn progress(&self) -> Value;
}

/// Health check handler returning `{ "status": "ok" }`.
pub async fn handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_owned() })
}

async fn progress_handler(State(source): State<Arc<dyn ProgressSource>>) -> Json<Value> {
    Json(source.progress())
}

/// Router exposing `/health` and `/progress`.
pub fn router(progress: Arc<dyn ProgressSource>) -> Router {
    Router::new()
        .route("/health", get(handler))
        .route("/progress", get(progress_handler))
        .with_state(progress)
}

/// Serve the health router on `addr` until `shutdown` resolves.
pub async fn serve<S>(addr: SocketAddr, progress: Arc<dyn ProgressSource>, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let app = router(progress);

    info!(%addr, "Starting health server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind health server on {addr}"))?;
    axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown).await?;
    Ok(())
}
