//! End-to-end HTTP tests against the full router: auth middleware, handlers
//! and the review workflow wired together over an in-memory SQLite pool and
//! a scratch storage directory.

use axum_test::{
    TestServer,
    multipart::{MultipartForm, Part},
};
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;

use upload_review::{
    models::user::{Role, User},
    routes::routes::routes,
    services::review_service::ReviewService,
};

async fn test_server() -> (TestServer, ReviewService, TempDir) {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let schema = include_str!("../migrations/0001_init.sql");
    for stmt in schema.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(&db).await.unwrap();
    }

    let dir = TempDir::new().unwrap();
    let service = ReviewService::new(Arc::new(db), dir.path());
    let server = TestServer::new(routes(service.clone())).unwrap();
    (server, service, dir)
}

async fn seed_user(service: &ReviewService, email: &str, role: Role) -> User {
    service
        .create_user(email, email, &format!("token-{}", email), role)
        .await
        .unwrap()
}

fn note_form() -> MultipartForm {
    MultipartForm::new()
        .add_text("resource_type", "study-note")
        .add_text("title", "DBMS Notes")
        .add_text("subject", "DBMS")
        .add_text("department", "CSE")
        .add_text("semester", "4")
        .add_text("year", "2025")
        .add_part(
            "file",
            Part::bytes(b"scanned notes".as_slice())
                .file_name("notes.pdf")
                .mime_type("application/pdf"),
        )
}

async fn submit_note(server: &TestServer, submitter: &User) -> Value {
    let response = server
        .post("/api/uploads")
        .authorization_bearer(&submitter.api_token)
        .multipart(note_form())
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let (server, _service, _dir) = test_server().await;

    server.get("/healthz").await.assert_status_ok();
    server.get("/readyz").await.assert_status_ok();
}

#[tokio::test]
async fn submission_requires_a_token() {
    let (server, _service, _dir) = test_server().await;

    let response = server.post("/api/uploads").multipart(note_form()).await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let response = server
        .post("/api/uploads")
        .authorization_bearer("bogus")
        .multipart(note_form())
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn submitted_upload_is_pending_and_hidden_from_public() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;

    let upload = submit_note(&server, &student).await;
    assert_eq!(upload["status"], "pending");
    assert_eq!(upload["title"], "DBMS Notes");
    assert_eq!(upload["resource_type"], "study-note");

    // Visible to the submitter.
    let own = server
        .get("/api/uploads")
        .authorization_bearer(&student.api_token)
        .await
        .json::<Value>();
    assert_eq!(own["uploads"].as_array().unwrap().len(), 1);

    // Not visible publicly, and not downloadable.
    let public = server.get("/api/resources").await.json::<Value>();
    assert!(public["uploads"].as_array().unwrap().is_empty());
    server
        .get(&format!("/api/resources/{}/file", upload["id"].as_str().unwrap()))
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_queue_requires_admin_role() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;

    let response = server
        .get("/api/admin/uploads")
        .authorization_bearer(&student.api_token)
        .await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn approve_publishes_and_is_single_shot() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;
    let admin = seed_user(&service, "admin@uni.edu", Role::Admin).await;

    let upload = submit_note(&server, &student).await;
    let id = upload["id"].as_str().unwrap().to_string();

    let response = server
        .post(&format!("/api/admin/uploads/{}/approve", id))
        .authorization_bearer(&admin.api_token)
        .await;
    response.assert_status_ok();
    let approved = response.json::<Value>();
    assert_eq!(approved["status"], "approved");
    assert!(approved["approved_at"].is_string());

    // A second approve loses against the already-taken transition.
    server
        .post(&format!("/api/admin/uploads/{}/approve", id))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);

    // Now browsable and downloadable publicly.
    let public = server.get("/api/resources").await.json::<Value>();
    assert_eq!(public["uploads"].as_array().unwrap().len(), 1);

    let download = server.get(&format!("/api/resources/{}/file", id)).await;
    download.assert_status_ok();
    assert_eq!(download.as_bytes().as_ref(), b"scanned notes" as &[u8]);
    assert_eq!(download.header("content-type"), "application/pdf");
}

#[tokio::test]
async fn reject_requires_a_reason_and_is_terminal() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;
    let admin = seed_user(&service, "admin@uni.edu", Role::Admin).await;

    let upload = submit_note(&server, &student).await;
    let id = upload["id"].as_str().unwrap().to_string();

    server
        .post(&format!("/api/admin/uploads/{}/reject", id))
        .authorization_bearer(&admin.api_token)
        .json(&json!({ "reason": "" }))
        .await
        .assert_status(axum::http::StatusCode::BAD_REQUEST);

    let response = server
        .post(&format!("/api/admin/uploads/{}/reject", id))
        .authorization_bearer(&admin.api_token)
        .json(&json!({ "reason": "Low quality scan" }))
        .await;
    response.assert_status_ok();
    let rejected = response.json::<Value>();
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["rejection_reason"], "Low quality scan");

    // Terminal: a later approve fails.
    server
        .post(&format!("/api/admin/uploads/{}/approve", id))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_filter_drives_the_review_queue() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;
    let admin = seed_user(&service, "admin@uni.edu", Role::Admin).await;

    let upload = submit_note(&server, &student).await;
    let id = upload["id"].as_str().unwrap().to_string();
    server
        .post(&format!("/api/admin/uploads/{}/approve", id))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status_ok();

    let approved = server
        .get("/api/admin/uploads?status=approved")
        .authorization_bearer(&admin.api_token)
        .await
        .json::<Value>();
    assert_eq!(approved["uploads"].as_array().unwrap().len(), 1);

    let pending = server
        .get("/api/admin/uploads?status=pending")
        .authorization_bearer(&admin.api_token)
        .await
        .json::<Value>();
    assert!(pending["uploads"].as_array().unwrap().is_empty());

    server
        .get("/api/admin/uploads?status=nonsense")
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn promotion_is_reserved_for_the_superadmin() {
    let (server, service, _dir) = test_server().await;
    let root = seed_user(&service, "root@uni.edu", Role::Superadmin).await;
    let admin = seed_user(&service, "admin@uni.edu", Role::Admin).await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;

    // An ordinary admin is refused even though it holds review rights.
    server
        .post("/api/admin/promote-user")
        .authorization_bearer(&admin.api_token)
        .json(&json!({ "email": student.email }))
        .await
        .assert_status(axum::http::StatusCode::FORBIDDEN);

    let response = server
        .post("/api/admin/promote-user")
        .authorization_bearer(&root.api_token)
        .json(&json!({ "email": student.email }))
        .await;
    response.assert_status_ok();
    let promoted = response.json::<Value>();
    assert_eq!(promoted["role"], "admin");
    assert!(promoted.get("api_token").is_none());

    server
        .post("/api/admin/promote-user")
        .authorization_bearer(&root.api_token)
        .json(&json!({ "email": "ghost@uni.edu" }))
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_is_limited_to_approved_uploads() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;
    let admin = seed_user(&service, "admin@uni.edu", Role::Admin).await;

    let upload = submit_note(&server, &student).await;
    let id = upload["id"].as_str().unwrap().to_string();

    server
        .delete(&format!("/api/admin/uploads/{}", id))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status(axum::http::StatusCode::CONFLICT);

    server
        .post(&format!("/api/admin/uploads/{}/approve", id))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status_ok();
    server
        .delete(&format!("/api/admin/uploads/{}", id))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    server
        .get(&format!("/api/resources/{}/file", id))
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_reflect_the_workflow() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;
    let admin = seed_user(&service, "admin@uni.edu", Role::Admin).await;

    let first = submit_note(&server, &student).await;
    submit_note(&server, &student).await;
    server
        .post(&format!(
            "/api/admin/uploads/{}/approve",
            first["id"].as_str().unwrap()
        ))
        .authorization_bearer(&admin.api_token)
        .await
        .assert_status_ok();

    let stats = server
        .get("/api/admin/stats")
        .authorization_bearer(&admin.api_token)
        .await
        .json::<Value>();
    assert_eq!(stats["users"], 2);
    assert_eq!(stats["uploads"], 2);
    assert_eq!(stats["pending"], 1);
    assert_eq!(stats["approved"], 1);
    assert_eq!(stats["rejected"], 0);
}

#[tokio::test]
async fn malformed_submissions_are_rejected() {
    let (server, service, _dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;

    // Missing file part.
    let form = MultipartForm::new()
        .add_text("resource_type", "study-note")
        .add_text("title", "DBMS Notes")
        .add_text("department", "CSE");
    server
        .post("/api/uploads")
        .authorization_bearer(&student.api_token)
        .multipart(form)
        .await
        .assert_status(axum::http::StatusCode::BAD_REQUEST);

    // Unknown resource type.
    let form = MultipartForm::new()
        .add_text("resource_type", "mixtape")
        .add_text("title", "DBMS Notes")
        .add_text("department", "CSE")
        .add_part("file", Part::bytes(b"x".as_slice()).file_name("x.pdf"));
    server
        .post("/api/uploads")
        .authorization_bearer(&student.api_token)
        .multipart(form)
        .await
        .assert_status(axum::http::StatusCode::BAD_REQUEST);

    // Empty title.
    let form = MultipartForm::new()
        .add_text("resource_type", "study-note")
        .add_text("title", "   ")
        .add_text("department", "CSE")
        .add_part("file", Part::bytes(b"x".as_slice()).file_name("x.pdf"));
    server
        .post("/api/uploads")
        .authorization_bearer(&student.api_token)
        .multipart(form)
        .await
        .assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn truncated_submission_leaves_no_staged_files() {
    let (server, service, dir) = test_server().await;
    let student = seed_user(&service, "student@uni.edu", Role::User).await;

    // A complete file part followed by a field cut off mid-body, as a client
    // abort would leave it. The staged payload must not survive the failure.
    let body = concat!(
        "--BOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"file\"; filename=\"notes.pdf\"\r\n",
        "Content-Type: application/pdf\r\n",
        "\r\n",
        "scanned notes\r\n",
        "--BOUNDARY\r\n",
        "Content-Disposition: form-data; name=\"title\"\r\n",
        "\r\n",
        "DBMS Not"
    );
    server
        .post("/api/uploads")
        .authorization_bearer(&student.api_token)
        .content_type("multipart/form-data; boundary=BOUNDARY")
        .bytes(body.as_bytes().into())
        .await
        .assert_status(axum::http::StatusCode::BAD_REQUEST);

    let staging = dir.path().join(".staging");
    let leftovers: Vec<_> = match std::fs::read_dir(&staging) {
        Ok(entries) => entries
            .map(|entry| entry.unwrap().path())
            .collect(),
        Err(_) => Vec::new(),
    };
    assert!(leftovers.is_empty(), "staged temp files left behind: {:?}", leftovers);
}
