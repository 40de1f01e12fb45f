//! Health check endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use splitledger_shared::types::Currency;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Currency every ledger is kept in.
    pub currency: Currency,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        currency: state.service.currency(),
    })
}

/// Creates health check routes. No identity required.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
