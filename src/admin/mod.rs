//! Admin HTTP endpoints for the hosting process.
//!
//! - `GET /health` aggregates every frontend's health
//! - `GET /metrics` renders the frontends' metrics registries

pub mod handlers;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

pub use self::handlers::AdminState;
use self::handlers::{get_health, get_metrics};

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin router until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "Admin endpoints listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
