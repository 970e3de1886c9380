//! src/services/review_service.rs
//!
//! ReviewService — the upload moderation workflow backed by SQLite for
//! metadata and local disk for payloads. Payloads live beneath
//! `base_path/{shard}/{shard}/{upload_id}/{filename}` where the shards are
//! the first two bytes of md5(upload_id). Review transitions are conditional
//! updates on `status = 'pending'` so that exactly one of two racing admin
//! actions wins.

use crate::models::{
    upload::{ResourceType, Upload, UploadStatus},
    user::{Role, User},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Metadata supplied with a submission. Everything except `title`,
/// `department` and `resource_type` is optional.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub resource_type: ResourceType,
    pub title: String,
    pub subject: Option<String>,
    pub department: String,
    pub semester: Option<String>,
    pub year: Option<i64>,
    pub session: Option<String>,
    pub marks: Option<i64>,
    pub chapter: Option<String>,
    pub description: Option<String>,
}

/// A payload already streamed to a temp file, waiting to be attached to a
/// record. Produced by [`ReviewService::stage_file`].
#[derive(Debug)]
pub struct StagedFile {
    pub tmp_path: PathBuf,
    pub size_bytes: i64,
    pub etag: String,
}

/// Filters accepted by the listing queries. `user_id` and `status` are set
/// by the service entry points, never directly by callers.
#[derive(Clone, Debug, Default)]
pub struct UploadQuery {
    pub status: Option<UploadStatus>,
    pub search: Option<String>,
    pub resource_type: Option<ResourceType>,
    pub department: Option<String>,
    pub subject: Option<String>,
    pub user_id: Option<Uuid>,
    pub cursor: Option<String>,
    pub limit: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct UploadPage {
    pub uploads: Vec<Upload>,
    pub next_cursor: Option<String>,
}

/// Aggregate counts shown on the admin dashboard.
#[derive(Debug, serde::Serialize, sqlx::FromRow)]
pub struct ModerationStats {
    pub users: i64,
    pub uploads: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("{0}")]
    Validation(String),
    #[error("upload `{0}` not found")]
    UploadNotFound(Uuid),
    #[error("user `{0}` not found")]
    UserNotFound(String),
    #[error("upload `{id}` is {status}")]
    InvalidState { id: Uuid, status: UploadStatus },
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ReviewResult<T> = Result<T, ReviewError>;

const UPLOAD_COLUMNS: &str = "id, user_id, resource_type, title, subject, department, semester, \
     year, session, marks, chapter, description, file_path, file_name, content_type, size_bytes, \
     etag, status, approved_by, approved_at, rejected_by, rejected_at, rejection_reason, uploaded_at";

const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 50;

/// ReviewService provides the moderation workflow:
/// - Submit an upload (streams bytes to disk, inserts a pending record)
/// - List uploads (admin view, submitter view, public approved view)
/// - Approve / reject (atomic conditional transition out of pending)
/// - Delete an approved upload
/// - Promote a user to admin (super-admin only)
///
/// Authorization is enforced here rather than in HTTP middleware so the
/// rules hold for every caller.
#[derive(Clone)]
pub struct ReviewService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,
}

impl ReviewService {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    // ---- users -----------------------------------------------------------

    /// Resolve a bearer token to a user record. `None` means unknown token.
    pub async fn authenticate(&self, token: &str) -> ReviewResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, name, api_token, role, created_at FROM users WHERE api_token = ?",
        )
        .bind(token)
        .fetch_optional(&*self.db)
        .await?;
        Ok(user)
    }

    /// Insert a provisioned account. Accounts come from the identity sync or
    /// the startup bootstrap; there is no self-registration path.
    pub async fn create_user(
        &self,
        email: &str,
        name: &str,
        api_token: &str,
        role: Role,
    ) -> ReviewResult<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            api_token: api_token.to_string(),
            role,
            created_at: Utc::now(),
        };
        match sqlx::query(
            "INSERT INTO users (id, email, name, api_token, role, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.api_token)
        .bind(user.role)
        .bind(user.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(user),
            Err(err) if is_unique_violation(&err) => Err(ReviewError::Validation(format!(
                "email or token for `{}` already in use",
                email
            ))),
            Err(err) => Err(ReviewError::Sqlx(err)),
        }
    }

    /// Seed (or refresh) the super-admin account configured at startup.
    pub async fn bootstrap_superadmin(&self, email: &str, api_token: &str) -> ReviewResult<()> {
        sqlx::query(
            "INSERT INTO users (id, email, name, api_token, role, created_at)
             VALUES (?, ?, ?, ?, 'superadmin', ?)
             ON CONFLICT(email) DO UPDATE SET
                 api_token = excluded.api_token,
                 role = 'superadmin'",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(email)
        .bind(api_token)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Grant the admin role to the account with `email`.
    ///
    /// Only the super-admin may promote; an ordinary admin is refused.
    /// Promoting an account that already holds admin or super-admin rights
    /// is a no-op returning the current record.
    pub async fn promote_user(&self, email: &str, actor: &User) -> ReviewResult<User> {
        if actor.role != Role::Superadmin {
            return Err(ReviewError::Forbidden(
                "only the super-admin can promote users".into(),
            ));
        }

        let target = sqlx::query_as::<_, User>(
            "SELECT id, email, name, api_token, role, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| ReviewError::UserNotFound(email.to_string()))?;

        if target.is_admin() {
            return Ok(target);
        }

        // Conditional on the role still being plain `user`, so a grant that
        // raced in between the lookup and this update is never overwritten.
        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET role = 'admin' WHERE id = ? AND role = 'user'
             RETURNING id, email, name, api_token, role, created_at",
        )
        .bind(target.id)
        .fetch_optional(&*self.db)
        .await?;

        match updated {
            Some(user) => Ok(user),
            // The role changed underneath us; report the current record.
            None => sqlx::query_as::<_, User>(
                "SELECT id, email, name, api_token, role, created_at FROM users WHERE id = ?",
            )
            .bind(target.id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| ReviewError::UserNotFound(email.to_string())),
        }
    }

    // ---- submission ------------------------------------------------------

    /// Stream an incoming payload to a temp file under `base_path/.staging`.
    ///
    /// Computes size and MD5 while streaming and fsyncs before returning.
    /// The temp file is removed on any error.
    pub async fn stage_file<S>(&self, stream: S) -> ReviewResult<StagedFile>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let staging_dir = self.base_path.join(".staging");
        fs::create_dir_all(&staging_dir).await?;
        let tmp_path = staging_dir.join(format!("tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ReviewError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ReviewError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ReviewError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ReviewError::Io(err));
        }

        Ok(StagedFile {
            tmp_path,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Drop a staged payload that will not be attached to a record.
    pub async fn discard_staged(&self, staged: StagedFile) {
        if let Err(err) = fs::remove_file(&staged.tmp_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove staged file {}: {}",
                    staged.tmp_path.display(),
                    err
                );
            }
        }
    }

    /// Create a pending upload from validated metadata and a staged payload.
    ///
    /// Moves the staged file into its sharded final location, then inserts
    /// the record. On a failed insert the payload file is removed again.
    pub async fn submit(
        &self,
        user: &User,
        meta: NewUpload,
        file_name: &str,
        content_type: Option<String>,
        staged: StagedFile,
    ) -> ReviewResult<Upload> {
        if let Err(err) = validate_metadata(&meta) {
            self.discard_staged(staged).await;
            return Err(err);
        }
        let file_name = match sanitize_file_name(file_name) {
            Ok(name) => name,
            Err(err) => {
                self.discard_staged(staged).await;
                return Err(err);
            }
        };

        let id = Uuid::new_v4();
        let rel_path = relative_payload_path(id, &file_name);
        let final_path = self.base_path.join(&rel_path);
        let parent = final_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ReviewError::Io(io::Error::other("payload path missing parent directory"))
        })?;
        fs::create_dir_all(&parent).await?;
        if let Err(err) = fs::rename(&staged.tmp_path, &final_path).await {
            let _ = fs::remove_file(&staged.tmp_path).await;
            self.prune_empty_dirs(&parent).await;
            return Err(ReviewError::Io(err));
        }

        let sql = format!(
            "INSERT INTO uploads (
                id, user_id, resource_type, title, subject, department, semester,
                year, session, marks, chapter, description, file_path, file_name,
                content_type, size_bytes, etag, status, uploaded_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
            RETURNING {UPLOAD_COLUMNS}"
        );
        let insert_result = sqlx::query_as::<_, Upload>(&sql)
            .bind(id)
            .bind(user.id)
            .bind(meta.resource_type)
            .bind(meta.title.trim())
            .bind(&meta.subject)
            .bind(meta.department.trim())
            .bind(&meta.semester)
            .bind(meta.year)
            .bind(&meta.session)
            .bind(meta.marks)
            .bind(&meta.chapter)
            .bind(&meta.description)
            .bind(&rel_path)
            .bind(&file_name)
            .bind(content_type)
            .bind(staged.size_bytes)
            .bind(&staged.etag)
            .bind(Utc::now())
            .fetch_one(&*self.db)
            .await;

        match insert_result {
            Ok(upload) => Ok(upload),
            Err(err) => {
                let _ = fs::remove_file(&final_path).await;
                self.prune_empty_dirs(&parent).await;
                Err(ReviewError::Sqlx(err))
            }
        }
    }

    // ---- listing ---------------------------------------------------------

    /// Admin review queue. Any status, free-text search over title and
    /// resource type.
    pub async fn list_for_admin(&self, actor: &User, query: UploadQuery) -> ReviewResult<UploadPage> {
        ensure_admin(actor)?;
        self.query_page(query).await
    }

    /// A submitter's own uploads, any status.
    pub async fn list_own(&self, user: &User, mut query: UploadQuery) -> ReviewResult<UploadPage> {
        query.status = None;
        query.user_id = Some(user.id);
        self.query_page(query).await
    }

    /// Public resource browse. Forced to approved records only so pending
    /// and rejected submissions are never exposed through this path.
    pub async fn list_public(&self, mut query: UploadQuery) -> ReviewResult<UploadPage> {
        query.status = Some(UploadStatus::Approved);
        query.user_id = None;
        self.query_page(query).await
    }

    async fn query_page(&self, query: UploadQuery) -> ReviewResult<UploadPage> {
        let limit = if query.limit == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            query.limit.min(MAX_PAGE_SIZE)
        };
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE 1 = 1"
        ));
        if let Some(status) = query.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }
        if let Some(user_id) = query.user_id {
            builder.push(" AND user_id = ");
            builder.push_bind(user_id);
        }
        if let Some(resource_type) = query.resource_type {
            builder.push(" AND resource_type = ");
            builder.push_bind(resource_type);
        }
        if let Some(department) = &query.department {
            builder.push(" AND department = ");
            builder.push_bind(department.clone());
        }
        if let Some(subject) = &query.subject {
            builder.push(" AND subject = ");
            builder.push_bind(subject.clone());
        }
        if let Some(search) = &query.search {
            let pattern = format!("%{}%", search);
            builder.push(" AND (title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR resource_type LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        if let Some(token) = &query.cursor {
            let (uploaded_at, id) = decode_cursor(token)?;
            builder.push(" AND (uploaded_at < ");
            builder.push_bind(uploaded_at);
            builder.push(" OR (uploaded_at = ");
            builder.push_bind(uploaded_at);
            builder.push(" AND id < ");
            builder.push_bind(id);
            builder.push("))");
        }
        builder.push(" ORDER BY uploaded_at DESC, id DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut uploads: Vec<Upload> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_cursor = None;
        if uploads.len() == fetch_limit {
            uploads.pop();
            if let Some(last) = uploads.last() {
                next_cursor = Some(encode_cursor(last.uploaded_at, last.id));
            }
        }

        Ok(UploadPage {
            uploads,
            next_cursor,
        })
    }

    async fn fetch_upload(&self, id: Uuid) -> ReviewResult<Upload> {
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?");
        sqlx::query_as::<_, Upload>(&sql)
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ReviewError::UploadNotFound(id),
                other => ReviewError::Sqlx(other),
            })
    }

    // ---- review transitions ----------------------------------------------

    /// Approve a pending upload, making it publicly visible.
    ///
    /// The update is conditional on `status = 'pending'`, so of two racing
    /// transitions exactly one succeeds; the loser sees InvalidState.
    pub async fn approve(&self, id: Uuid, actor: &User) -> ReviewResult<Upload> {
        ensure_admin(actor)?;
        let sql = format!(
            "UPDATE uploads SET status = 'approved', approved_by = ?, approved_at = ?
             WHERE id = ? AND status = 'pending'
             RETURNING {UPLOAD_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Upload>(&sql)
            .bind(actor.id)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;

        match updated {
            Some(upload) => Ok(upload),
            None => Err(self.transition_failure(id).await),
        }
    }

    /// Reject a pending upload with a mandatory reason.
    pub async fn reject(&self, id: Uuid, actor: &User, reason: &str) -> ReviewResult<Upload> {
        ensure_admin(actor)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ReviewError::Validation(
                "a rejection reason is required".into(),
            ));
        }

        let sql = format!(
            "UPDATE uploads SET status = 'rejected', rejected_by = ?, rejected_at = ?,
                 rejection_reason = ?
             WHERE id = ? AND status = 'pending'
             RETURNING {UPLOAD_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Upload>(&sql)
            .bind(actor.id)
            .bind(Utc::now())
            .bind(reason)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;

        match updated {
            Some(upload) => Ok(upload),
            None => Err(self.transition_failure(id).await),
        }
    }

    /// Distinguish a missing record from a record already out of pending.
    async fn transition_failure(&self, id: Uuid) -> ReviewError {
        match self.fetch_upload(id).await {
            Ok(upload) => ReviewError::InvalidState {
                id,
                status: upload.status,
            },
            Err(err) => err,
        }
    }

    /// Remove an approved upload and its payload.
    ///
    /// Deletion is an administrative action distinct from the review
    /// transitions and is only permitted from the approved state.
    pub async fn delete_approved(&self, id: Uuid, actor: &User) -> ReviewResult<Upload> {
        ensure_admin(actor)?;
        let upload = self.fetch_upload(id).await?;
        if upload.status != UploadStatus::Approved {
            return Err(ReviewError::InvalidState {
                id,
                status: upload.status,
            });
        }

        let result = sqlx::query("DELETE FROM uploads WHERE id = ? AND status = 'approved'")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(self.transition_failure(id).await);
        }

        let file_path = self.base_path.join(&upload.file_path);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(ReviewError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(upload)
    }

    // ---- public download ---------------------------------------------------

    /// Open the payload of an approved upload for streaming out.
    ///
    /// Pending and rejected uploads answer `UploadNotFound` so their
    /// existence is not disclosed through the public path.
    pub async fn open_approved_reader(&self, id: Uuid) -> ReviewResult<(Upload, File)> {
        let upload = self.fetch_upload(id).await?;
        if upload.status != UploadStatus::Approved {
            return Err(ReviewError::UploadNotFound(id));
        }

        let file_path = self.base_path.join(&upload.file_path);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ReviewError::UploadNotFound(id)
            } else {
                ReviewError::Io(err)
            }
        })?;
        Ok((upload, file))
    }

    // ---- dashboard ---------------------------------------------------------

    /// Counts for the admin dashboard.
    pub async fn stats(&self, actor: &User) -> ReviewResult<ModerationStats> {
        ensure_admin(actor)?;
        let stats = sqlx::query_as::<_, ModerationStats>(
            "SELECT
                 (SELECT COUNT(*) FROM users) AS users,
                 COUNT(*) AS uploads,
                 COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                 COUNT(*) FILTER (WHERE status = 'approved') AS approved,
                 COUNT(*) FILTER (WHERE status = 'rejected') AS rejected
             FROM uploads",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(stats)
    }

    /// Recursively remove empty shard directories up to the storage root.
    ///
    /// Stops at the first non-empty or missing directory.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn ensure_admin(actor: &User) -> ReviewResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(ReviewError::Forbidden(
            "administrator privilege required".into(),
        ))
    }
}

fn validate_metadata(meta: &NewUpload) -> ReviewResult<()> {
    if meta.title.trim().is_empty() {
        return Err(ReviewError::Validation("title must not be empty".into()));
    }
    if meta.department.trim().is_empty() {
        return Err(ReviewError::Validation(
            "department must not be empty".into(),
        ));
    }
    Ok(())
}

/// Strip directory components and reject names that could escape the
/// storage root.
fn sanitize_file_name(file_name: &str) -> ReviewResult<String> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(ReviewError::Validation("invalid file name".into()));
    }
    if name.bytes().any(|b| b.is_ascii_control()) {
        return Err(ReviewError::Validation("invalid file name".into()));
    }
    Ok(name.to_string())
}

/// Two-level shard path for a payload: `{aa}/{bb}/{id}/{filename}` with the
/// shards taken from md5 of the hyphenated upload id.
fn relative_payload_path(id: Uuid, file_name: &str) -> String {
    let digest = md5::compute(id.to_string());
    format!("{:02x}/{:02x}/{}/{}", digest[0], digest[1], id, file_name)
}

/// Return true if the SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn encode_cursor(uploaded_at: DateTime<Utc>, id: Uuid) -> String {
    general_purpose::STANDARD.encode(format!("{}|{}", uploaded_at.to_rfc3339(), id))
}

fn decode_cursor(token: &str) -> ReviewResult<(DateTime<Utc>, Uuid)> {
    let invalid = || ReviewError::Validation("invalid pagination cursor".into());
    let bytes = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (timestamp, id) = text.split_once('|').ok_or_else(invalid)?;
    let uploaded_at = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok((uploaded_at, id))
}
