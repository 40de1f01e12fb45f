//! Notification inbox and live stream routes.

use axum::{
    Json, Router,
    extract::{
        State,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::{get, put},
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use splitledger_core::notification::{NotificationEvent, NotificationKind, Subscription};
use splitledger_shared::types::{
    Currency, GroupId, NotificationId, PageRequest, PageResponse, UserId,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::amount_string;
use crate::extract::ApiQuery;
use crate::{AppState, error::ApiError, middleware::Actor};

/// Creates the notification routes (requires identity middleware to be applied externally).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read", put(mark_read))
        .route("/notifications/ws", get(stream_notifications))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing notifications.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Page number (1-indexed).
    pub page: Option<u32>,
    /// Items per page.
    pub per_page: Option<u32>,
}

/// Request body for marking notifications read.
#[derive(Debug, Default, Deserialize)]
pub struct MarkReadRequest {
    /// Notifications to mark. All of the caller's when absent.
    pub ids: Option<Vec<NotificationId>>,
}

/// A notification as delivered to clients.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    /// Notification ID.
    pub id: NotificationId,
    /// Event kind.
    pub kind: NotificationKind,
    /// Group the entry belongs to.
    pub group_id: GroupId,
    /// Group name.
    pub group_name: String,
    /// Member who made the change.
    pub actor: UserId,
    /// Expense or settlement ID.
    pub entry_id: Uuid,
    /// Entry amount in major units.
    pub amount: String,
    /// Currency code.
    pub currency: Currency,
    /// Summary text.
    pub message: String,
    /// Whether it has been read.
    pub read: bool,
    /// When it was produced.
    pub created_at: DateTime<Utc>,
}

impl From<NotificationEvent> for NotificationResponse {
    fn from(event: NotificationEvent) -> Self {
        Self {
            id: event.id,
            kind: event.kind,
            group_id: event.payload.group_id,
            group_name: event.payload.group_name,
            actor: event.payload.actor,
            entry_id: event.payload.entry_id,
            amount: amount_string(event.payload.amount),
            currency: event.payload.amount.currency,
            message: event.payload.message,
            read: event.read,
            created_at: event.created_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_notifications(
    State(state): State<AppState>,
    actor: Actor,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<Json<PageResponse<NotificationResponse>>, ApiError> {
    let defaults = PageRequest::default();
    let page = PageRequest::new(
        query.page.unwrap_or(defaults.page),
        query.per_page.unwrap_or(defaults.per_page),
    );

    let inbox = state.service.fetch_inbox(actor.user_id(), page).await?;
    Ok(Json(PageResponse {
        data: inbox.data.into_iter().map(NotificationResponse::from).collect(),
        meta: inbox.meta,
    }))
}

async fn unread_count(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<serde_json::Value>, ApiError> {
    let unread = state.service.unread_count(actor.user_id()).await?;
    Ok(Json(json!({ "unread": unread })))
}

async fn mark_read(
    State(state): State<AppState>,
    actor: Actor,
    body: Result<Option<Json<MarkReadRequest>>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let ids = body?.and_then(|Json(body)| body.ids);
    let updated = match ids {
        Some(ids) => state.service.mark_read(actor.user_id(), &ids).await?,
        None => state.service.mark_all_read(actor.user_id()).await?,
    };
    Ok(Json(json!({ "updated": updated })))
}

async fn stream_notifications(
    State(state): State<AppState>,
    actor: Actor,
    ws: WebSocketUpgrade,
) -> Response {
    // Subscribe before the upgrade so nothing published in between is lost.
    let receiver = state.service.subscribe(actor.user_id());
    ws.on_upgrade(move |socket| forward_events(socket, actor.user_id(), receiver))
}

/// Pushes live events to the socket until either side goes away.
async fn forward_events(
    socket: WebSocket,
    user: UserId,
    mut receiver: Subscription,
) {
    info!(user = %user, "Notification stream opened");
    let (mut sink, mut incoming) = socket.split();

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&NotificationResponse::from(event)) else {
                        continue;
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // The inbox still has them.
                    warn!(user = %user, skipped, "Live notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(user = %user, "Notification stream closed");
}
