//! Defines routes for the upload moderation API.
//!
//! ## Structure
//! - **Public endpoints** (no auth)
//!   - `GET /healthz` / `GET /readyz`
//!   - `GET /api/resources` — browse approved resources
//!   - `GET /api/resources/{id}/file` — download an approved payload
//!
//! - **Authenticated endpoints** (bearer token resolved to a user)
//!   - `POST /api/uploads` — submit a resource (multipart)
//!   - `GET  /api/uploads` — the submitter's own uploads
//!
//! - **Admin endpoints** (token required here; role enforced in the service)
//!   - `GET    /api/admin/uploads` — review queue
//!   - `POST   /api/admin/uploads/{id}/approve`
//!   - `POST   /api/admin/uploads/{id}/reject`
//!   - `DELETE /api/admin/uploads/{id}` — remove an approved upload
//!   - `POST   /api/admin/promote-user` — super-admin only
//!   - `GET    /api/admin/stats`

use crate::{
    auth,
    handlers::{
        admin_handlers::{
            admin_stats, approve_upload, delete_upload, list_uploads, promote_user, reject_upload,
        },
        health_handlers::{healthz, readyz},
        upload_handlers::{download_resource, list_resources, list_own_uploads, submit_upload},
    },
    services::review_service::ReviewService,
};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

/// Build the full router. The shared `ReviewService` is both the handler
/// state and the state of the token-resolving middleware.
pub fn routes(service: ReviewService) -> Router {
    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/resources", get(list_resources))
        .route("/api/resources/{id}/file", get(download_resource));

    let authed = Router::new()
        .route("/api/uploads", post(submit_upload).get(list_own_uploads))
        .route("/api/admin/uploads", get(list_uploads))
        .route("/api/admin/uploads/{id}/approve", post(approve_upload))
        .route("/api/admin/uploads/{id}/reject", post(reject_upload))
        .route("/api/admin/uploads/{id}", delete(delete_upload))
        .route("/api/admin/promote-user", post(promote_user))
        .route("/api/admin/stats", get(admin_stats))
        .route_layer(middleware::from_fn_with_state(
            service.clone(),
            auth::require_user,
        ));

    public.merge(authed).with_state(service)
}
