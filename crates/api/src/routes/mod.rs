//! API route definitions.

use axum::{Router, middleware};
use splitledger_shared::types::Money;

use crate::{AppState, middleware::identity_middleware};

pub mod groups;
pub mod health;
pub mod me;
pub mod notifications;

/// Creates the API router. Everything but the health check requires a
/// caller identity.
pub fn api_routes() -> Router<AppState> {
    let protected_routes = Router::new()
        .merge(groups::routes())
        .merge(me::routes())
        .merge(notifications::routes())
        .layer(middleware::from_fn(identity_middleware));

    Router::new()
        .merge(health::routes())
        .merge(protected_routes)
}

/// Renders an amount in major units, e.g. `"12.50"`.
pub(crate) fn amount_string(amount: Money) -> String {
    amount.to_decimal().to_string()
}
