//! Represents a user-submitted resource moving through the review lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Kind of resource a user can submit.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum ResourceType {
    QuestionPaper,
    StudyNote,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::QuestionPaper => "question-paper",
            ResourceType::StudyNote => "study-note",
        }
    }

    /// Parse the wire form (`question-paper` / `study-note`).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "question-paper" => Some(ResourceType::QuestionPaper),
            "study-note" => Some(ResourceType::StudyNote),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review lifecycle state of an upload.
///
/// `Pending` is the only initial state. `Approved` and `Rejected` are
/// terminal; an upload transitions exactly once.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Approved,
    Rejected,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Approved => "approved",
            UploadStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(UploadStatus::Pending),
            "approved" => Some(UploadStatus::Approved),
            "rejected" => Some(UploadStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted resource record.
///
/// The struct stores descriptive metadata and a reference to the payload on
/// disk, not the content bytes themselves. Review fields (`approved_*`,
/// `rejected_*`) are populated exactly once by an admin transition.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Upload {
    /// Internal UUID, assigned at submission.
    pub id: Uuid,

    /// Submitting user.
    pub user_id: Uuid,

    /// Resource kind.
    pub resource_type: ResourceType,

    /// Human-readable title (required, non-empty).
    pub title: String,

    /// Subject the resource belongs to.
    pub subject: Option<String>,

    /// Department the resource belongs to (required, non-empty).
    pub department: String,

    pub semester: Option<String>,
    pub year: Option<i64>,
    pub session: Option<String>,
    pub marks: Option<i64>,
    pub chapter: Option<String>,
    pub description: Option<String>,

    /// Payload location relative to the storage root.
    pub file_path: String,

    /// Original filename of the uploaded file.
    pub file_name: String,

    /// Content type (MIME type) as reported by the client.
    pub content_type: Option<String>,

    /// Payload size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload, hex-encoded.
    pub etag: String,

    /// Current lifecycle state.
    pub status: UploadStatus,

    /// Admin who approved, set on transition.
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,

    /// Admin who rejected, set on transition.
    pub rejected_by: Option<Uuid>,
    pub rejected_at: Option<DateTime<Utc>>,

    /// Required free-text reason, present iff rejected.
    pub rejection_reason: Option<String>,

    /// When the record was created. Immutable.
    pub uploaded_at: DateTime<Utc>,
}
