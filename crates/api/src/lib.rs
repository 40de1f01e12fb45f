//! HTTP API layer with Axum routes and middleware.
//!
//! This crate provides:
//! - REST routes over the ledger service
//! - A WebSocket stream of live notifications
//! - Caller identity middleware
//! - JSON error responses, including extractor rejections

pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;

use axum::Router;
use splitledger_core::ledger::LedgerService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ledger, balances and notifications.
    pub service: LedgerService,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
