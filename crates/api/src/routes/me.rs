//! Caller-centric views across groups.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use splitledger_shared::types::{Currency, GroupId};

use super::amount_string;
use crate::{AppState, error::ApiError, middleware::Actor};

/// Creates the `/me` routes (requires identity middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new().route("/me/positions", get(list_positions))
}

/// The caller's net balance in one group.
#[derive(Debug, Serialize)]
pub struct PositionResponse {
    /// Group ID.
    pub group_id: GroupId,
    /// Group name.
    pub group_name: String,
    /// Net balance in major units. Positive means the caller is owed.
    pub balance: String,
    /// Currency code.
    pub currency: Currency,
}

async fn list_positions(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<PositionResponse>>, ApiError> {
    let positions = state.service.member_position(actor.user_id()).await?;
    Ok(Json(
        positions
            .into_iter()
            .map(|p| PositionResponse {
                group_id: p.group_id,
                group_name: p.group_name,
                balance: amount_string(p.balance),
                currency: p.balance.currency,
            })
            .collect(),
    ))
}
