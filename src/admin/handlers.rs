use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use crate::controller::Controller;
use crate::observability::MetricsRegistry;

/// Shared state for the admin endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub controller: Arc<Controller>,
    pub registries: Vec<Arc<MetricsRegistry>>,
}

/// `GET /health`: 200 when every frontend is healthy, 500 with the reason otherwise.
pub async fn get_health(State(state): State<AdminState>) -> (StatusCode, String) {
    match state.controller.health() {
        Ok(()) => (StatusCode::OK, "ok\n".to_string()),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)),
    }
}

/// `GET /metrics`: every frontend's registry in Prometheus text format.
pub async fn get_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    let body: String = state.registries.iter().map(|r| r.render()).collect();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
