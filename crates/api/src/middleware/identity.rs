//! Caller identity for protected routes.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user in the `X-User-Id` header.

use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use splitledger_shared::AppError;
use splitledger_shared::types::UserId;

use crate::error::ApiError;

/// Header carrying the caller's user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Parses the identity header.
fn parse_user_id(value: Option<&str>) -> Result<UserId, AppError> {
    let value = value.ok_or_else(|| AppError::Unauthorized("X-User-Id header is required".into()))?;
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Unauthorized("X-User-Id header is not a valid user ID".into()))
}

/// Middleware that resolves the caller and stores it in request extensions.
///
/// Requests without a valid identity are rejected with 401.
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok());

    match parse_user_id(header) {
        Ok(user_id) => {
            request.extensions_mut().insert(Actor(user_id));
            next.run(request).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// Extractor for the calling user.
///
/// ```ignore
/// async fn handler(actor: Actor) -> impl IntoResponse {
///     let user_id = actor.user_id();
///     // ...
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub UserId);

impl Actor {
    /// Returns the caller's user ID.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.0
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("Caller identity required".into()).into())
    }
}
