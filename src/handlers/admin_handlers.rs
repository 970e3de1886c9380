//! HTTP handlers for the admin review panel.
//!
//! Every handler receives the authenticated `User` from the auth middleware
//! and hands it to `ReviewService`, which enforces the role checks.

use crate::{
    errors::AppError,
    models::{upload::UploadStatus, user::User},
    services::review_service::{ReviewService, UploadQuery},
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

/// Query params accepted by the admin upload listing.
#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    /// `pending` | `approved` | `rejected` | `all` (default `all`).
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub email: String,
}

/// GET `/api/admin/uploads?status=&search=` — the review queue.
pub async fn list_uploads(
    State(service): State<ReviewService>,
    Extension(actor): Extension<User>,
    Query(q): Query<AdminListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = match q.status.as_deref() {
        None | Some("all") => None,
        Some(value) => Some(UploadStatus::parse(value).ok_or_else(|| {
            AppError::bad_request(format!("unknown status filter `{}`", value))
        })?),
    };

    let page = service
        .list_for_admin(
            &actor,
            UploadQuery {
                status,
                search: q.search,
                limit: q.limit.unwrap_or(0),
                cursor: q.cursor,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(page))
}

/// POST `/api/admin/uploads/{id}/approve`
pub async fn approve_upload(
    State(service): State<ReviewService>,
    Extension(actor): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let upload = service.approve(id, &actor).await?;
    Ok(Json(upload))
}

/// POST `/api/admin/uploads/{id}/reject`
pub async fn reject_upload(
    State(service): State<ReviewService>,
    Extension(actor): Extension<User>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let upload = service.reject(id, &actor, &body.reason).await?;
    Ok(Json(upload))
}

/// DELETE `/api/admin/uploads/{id}` — remove an approved upload.
pub async fn delete_upload(
    State(service): State<ReviewService>,
    Extension(actor): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_approved(id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/api/admin/promote-user` — grant the admin role (super-admin only).
pub async fn promote_user(
    State(service): State<ReviewService>,
    Extension(actor): Extension<User>,
    Json(body): Json<PromoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = service.promote_user(&body.email, &actor).await?;
    Ok(Json(user))
}

/// GET `/api/admin/stats` — dashboard counts.
pub async fn admin_stats(
    State(service): State<ReviewService>,
    Extension(actor): Extension<User>,
) -> Result<impl IntoResponse, AppError> {
    let stats = service.stats(&actor).await?;
    Ok(Json(stats))
}
