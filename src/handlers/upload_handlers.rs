//! HTTP handlers for submission and the public resource surface.
//! Streams payloads through `ReviewService` instead of buffering them in
//! memory, both on the way in (multipart) and out (download).

use crate::{
    errors::AppError,
    models::{
        upload::{ResourceType, Upload},
        user::User,
    },
    services::review_service::{NewUpload, ReviewService, StagedFile, UploadQuery},
};
use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::stream;
use serde::Deserialize;
use std::{collections::HashMap, io};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// Query params accepted by the public resource listing.
#[derive(Debug, Deserialize)]
pub struct ResourceListQuery {
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub department: Option<String>,
    pub subject: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// Query params accepted by the submitter's own listing.
#[derive(Debug, Deserialize)]
pub struct OwnListQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// POST `/api/uploads` — submit a resource as multipart form data.
///
/// Text fields carry the metadata; the single `file` field carries the
/// payload. The payload is staged to disk as it arrives, so field order
/// does not matter.
pub async fn submit_upload(
    State(service): State<ReviewService>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut file: Option<(StagedFile, String, Option<String>)> = None;

    // A failure anywhere in the multipart stream (truncated body, client
    // abort, a broken later field) must still release an already staged
    // payload, or aborted submissions pile up in the staging directory.
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                if let Some((staged, _, _)) = file.take() {
                    service.discard_staged(staged).await;
                }
                return Err(AppError::bad_request(err.to_string()));
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            if let Some((stale, _, _)) = file.take() {
                service.discard_staged(stale).await;
            }
            let file_name = field.file_name().unwrap_or("upload.bin").to_string();
            let content_type = field.content_type().map(|ct| ct.to_string());
            let chunks = stream::try_unfold(field, |mut field| async move {
                match field.chunk().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, field))),
                    Ok(None) => Ok(None),
                    Err(err) => Err(io::Error::other(err)),
                }
            });
            let staged = service.stage_file(chunks).await?;
            file = Some((staged, file_name, content_type));
        } else {
            match field.text().await {
                Ok(value) => {
                    fields.insert(name, value);
                }
                Err(err) => {
                    if let Some((staged, _, _)) = file.take() {
                        service.discard_staged(staged).await;
                    }
                    return Err(AppError::bad_request(err.to_string()));
                }
            }
        }
    }

    let Some((staged, file_name, content_type)) = file else {
        return Err(AppError::bad_request("missing `file` field"));
    };

    let meta = match build_metadata(&mut fields) {
        Ok(meta) => meta,
        Err(err) => {
            service.discard_staged(staged).await;
            return Err(err);
        }
    };

    let upload = service
        .submit(&user, meta, &file_name, content_type, staged)
        .await?;
    Ok((StatusCode::CREATED, Json(upload)))
}

/// GET `/api/uploads` — the submitter's own uploads, any status.
pub async fn list_own_uploads(
    State(service): State<ReviewService>,
    Extension(user): Extension<User>,
    Query(q): Query<OwnListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = service
        .list_own(
            &user,
            UploadQuery {
                limit: q.limit.unwrap_or(0),
                cursor: q.cursor,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(page))
}

/// GET `/api/resources` — public browse over approved uploads.
pub async fn list_resources(
    State(service): State<ReviewService>,
    Query(q): Query<ResourceListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let resource_type = q
        .resource_type
        .as_deref()
        .map(|value| {
            ResourceType::parse(value).ok_or_else(|| {
                AppError::bad_request(format!("unknown resource type `{}`", value))
            })
        })
        .transpose()?;

    let page = service
        .list_public(UploadQuery {
            resource_type,
            department: q.department,
            subject: q.subject,
            search: q.search,
            limit: q.limit.unwrap_or(0),
            cursor: q.cursor,
            ..Default::default()
        })
        .await?;
    Ok(Json(page))
}

/// GET `/api/resources/{id}/file` — stream an approved payload.
pub async fn download_resource(
    State(service): State<ReviewService>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let (upload, file) = service.open_approved_reader(id).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_payload_headers(response.headers_mut(), &upload);
    Ok(response)
}

fn set_payload_headers(headers: &mut HeaderMap, upload: &Upload) {
    let content_type = upload
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&upload.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", upload.etag)) {
        headers.insert(header::ETAG, value);
    }
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", upload.file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// Assemble and type-check the metadata text fields.
fn build_metadata(fields: &mut HashMap<String, String>) -> Result<NewUpload, AppError> {
    let resource_type = fields
        .remove("resource_type")
        .and_then(|value| ResourceType::parse(&value))
        .ok_or_else(|| {
            AppError::bad_request("resource_type must be `question-paper` or `study-note`")
        })?;
    let year = parse_int_field(fields, "year")?;
    let marks = parse_int_field(fields, "marks")?;

    Ok(NewUpload {
        resource_type,
        title: fields.remove("title").unwrap_or_default(),
        subject: fields.remove("subject"),
        department: fields.remove("department").unwrap_or_default(),
        semester: fields.remove("semester"),
        year,
        session: fields.remove("session"),
        marks,
        chapter: fields.remove("chapter"),
        description: fields.remove("description"),
    })
}

fn parse_int_field(
    fields: &mut HashMap<String, String>,
    name: &str,
) -> Result<Option<i64>, AppError> {
    fields
        .remove(name)
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| AppError::bad_request(format!("`{}` must be an integer", name)))
        })
        .transpose()
}
