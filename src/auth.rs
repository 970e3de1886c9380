//! Bearer-token authentication middleware.
//!
//! Tokens are issued by the external identity provider; this layer only
//! resolves them against provisioned user records and makes the resolved
//! `User` available to handlers via request extensions. Role checks happen
//! in `ReviewService`, not here.

use crate::{errors::AppError, services::review_service::ReviewService};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Reject requests without a resolvable `Authorization: Bearer <token>`.
pub async fn require_user(
    State(service): State<ReviewService>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        Some(token) => token,
        None => {
            return AppError::unauthorized("missing bearer token").into_response();
        }
    };

    let user = match service.authenticate(token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return AppError::unauthorized("unknown bearer token").into_response();
        }
        Err(err) => return AppError::from(err).into_response(),
    };

    request.extensions_mut().insert(user);
    next.run(request).await
}
