//! Batch and upload request data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::metadata::{Label, Statement};
use crate::source::SourceKind;

/// Lifecycle status of an upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    DuplicatedSdcUpdated,
    DuplicatedSdcNotUpdated,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Queued => "queued",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::DuplicatedSdcUpdated => "duplicated_sdc_updated",
            UploadStatus::DuplicatedSdcNotUpdated => "duplicated_sdc_not_updated",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Queued | UploadStatus::InProgress)
    }

    /// Terminal statuses a pipeline run may finish with.
    pub fn is_pipeline_outcome(&self) -> bool {
        self.is_terminal() && *self != UploadStatus::Cancelled
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            UploadStatus::DuplicatedSdcUpdated | UploadStatus::DuplicatedSdcNotUpdated
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(UploadStatus::Queued),
            "in_progress" => Ok(UploadStatus::InProgress),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            "duplicated_sdc_updated" => Ok(UploadStatus::DuplicatedSdcUpdated),
            "duplicated_sdc_not_updated" => Ok(UploadStatus::DuplicatedSdcNotUpdated),
            "cancelled" => Ok(UploadStatus::Cancelled),
            other => Err(format!("unknown upload status: {}", other)),
        }
    }
}

/// Link to an existing file found by duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateLink {
    pub title: String,
    pub url: String,
}

/// Error recorded on a request that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredError {
    Error {
        message: String,
    },
    Duplicate {
        message: String,
        links: Vec<DuplicateLink>,
    },
}

impl StructuredError {
    pub fn error(message: impl Into<String>) -> Self {
        StructuredError::Error {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StructuredError::Error { message } | StructuredError::Duplicate { message, .. } => {
                message
            }
        }
    }
}

/// A user-submitted group of upload requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub user_id: String,
    /// Shared by every edit made on behalf of this batch.
    pub edit_group_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-status request counts of a batch. Always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: i64,
    pub queued: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Both duplicate outcomes.
    pub duplicate: i64,
}

impl BatchStats {
    pub fn record(&mut self, status: UploadStatus, count: i64) {
        self.total += count;
        match status {
            UploadStatus::Queued => self.queued += count,
            UploadStatus::InProgress => self.in_progress += count,
            UploadStatus::Completed => self.completed += count,
            UploadStatus::Failed => self.failed += count,
            UploadStatus::Cancelled => self.cancelled += count,
            UploadStatus::DuplicatedSdcUpdated | UploadStatus::DuplicatedSdcNotUpdated => {
                self.duplicate += count
            }
        }
    }

    /// No request is waiting or running.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.in_progress == 0
    }
}

/// A batch together with its derived stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: Batch,
    pub stats: BatchStats,
}

/// One item to upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub id: i64,
    pub batch_id: i64,
    pub user_id: String,
    pub source: SourceKind,
    /// Source-provider key of the media item.
    pub key: String,
    pub collection: Option<String>,
    /// Target name on the remote repository.
    pub title: String,
    pub wikitext: Option<String>,
    pub status: UploadStatus,
    pub task_handle: Option<String>,
    pub error: Option<StructuredError>,
    /// Published URL once completed.
    pub success: Option<String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Remote credential, present only between creation and the end of the pipeline run.
    #[serde(skip)]
    pub credential: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRequest {
    /// Copy of this request for a retry in another batch: same item and
    /// metadata, no handle, no outcome, the retrying user's credential.
    pub fn retry_copy(&self, credential: Option<String>) -> NewUploadRequest {
        NewUploadRequest {
            source: self.source,
            key: self.key.clone(),
            collection: self.collection.clone(),
            title: self.title.clone(),
            wikitext: self.wikitext.clone(),
            statements: self.statements.clone(),
            labels: self.labels.clone(),
            credential,
        }
    }
}

/// Fields supplied when creating a request. Status always starts as queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUploadRequest {
    pub source: SourceKind,
    pub key: String,
    #[serde(default)]
    pub collection: Option<String>,
    pub title: String,
    #[serde(default)]
    pub wikitext: Option<String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(skip)]
    pub credential: Option<String>,
}

impl NewUploadRequest {
    pub fn new(source: SourceKind, key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            key: key.into(),
            collection: None,
            title: title.into(),
            wikitext: None,
            statements: Vec::new(),
            labels: Vec::new(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

/// Terminal outcome written by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: UploadStatus,
    pub error: Option<StructuredError>,
    pub success: Option<String>,
}

impl Completion {
    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Completed,
            error: None,
            success: Some(url.into()),
        }
    }

    pub fn failed(error: StructuredError) -> Self {
        Self {
            status: UploadStatus::Failed,
            error: Some(error),
            success: None,
        }
    }

    /// Duplicate outcome; `updated` tells whether existing metadata was changed.
    pub fn duplicate(updated: bool, error: StructuredError) -> Self {
        Self {
            status: if updated {
                UploadStatus::DuplicatedSdcUpdated
            } else {
                UploadStatus::DuplicatedSdcNotUpdated
            },
            error: Some(error),
            success: None,
        }
    }
}

/// A request moved to cancelled, with the handle it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledRequest {
    pub id: i64,
    pub task_handle: Option<String>,
}

/// Which failed requests to copy into a new batch.
#[derive(Debug, Clone)]
pub struct RetrySelection {
    pub request_ids: Vec<i64>,
    /// Only requests owned by this user qualify when set.
    pub owner: Option<String>,
    /// Owner of the new batch.
    pub requested_by: String,
    pub edit_group_id: String,
    pub credential: Option<String>,
}

/// The batch created by a retry and its fresh requests.
#[derive(Debug, Clone)]
pub struct RetryCopy {
    pub batch: Batch,
    pub requests: Vec<UploadRequest>,
}

/// Saved upload settings a user can reuse for one source provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: i64,
    pub user_id: String,
    pub source: SourceKind,
    pub title: String,
    pub title_template: String,
    pub labels: Option<Label>,
    pub categories: Option<String>,
    pub exclude_from_date_category: bool,
    /// At most one default preset per user and source.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable fields of a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetDraft {
    pub source: SourceKind,
    pub title: String,
    pub title_template: String,
    #[serde(default)]
    pub labels: Option<Label>,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub exclude_from_date_category: bool,
    #[serde(default)]
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            UploadStatus::Queued,
            UploadStatus::InProgress,
            UploadStatus::Completed,
            UploadStatus::Failed,
            UploadStatus::DuplicatedSdcUpdated,
            UploadStatus::DuplicatedSdcNotUpdated,
            UploadStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!(!UploadStatus::Queued.is_terminal());
        assert!(!UploadStatus::InProgress.is_terminal());
        assert!(UploadStatus::Cancelled.is_terminal());
        assert!(!UploadStatus::Cancelled.is_pipeline_outcome());
        assert!(UploadStatus::DuplicatedSdcNotUpdated.is_pipeline_outcome());
    }

    #[test]
    fn test_structured_error_serialization() {
        let err = StructuredError::Duplicate {
            message: "File already exists".to_string(),
            links: vec![DuplicateLink {
                title: "File:A.jpg".to_string(),
                url: "https://commons.wikimedia.org/wiki/File:A.jpg".to_string(),
            }],
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "duplicate");
        assert_eq!(json["links"][0]["title"], "File:A.jpg");

        let plain = serde_json::to_value(StructuredError::error("boom")).unwrap();
        assert_eq!(plain, serde_json::json!({"type": "error", "message": "boom"}));
    }

    #[test]
    fn test_batch_stats_record() {
        let mut stats = BatchStats::default();
        stats.record(UploadStatus::Completed, 1);
        stats.record(UploadStatus::Queued, 1);
        stats.record(UploadStatus::Cancelled, 1);
        stats.record(UploadStatus::DuplicatedSdcUpdated, 2);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.duplicate, 2);
        assert!(!stats.is_settled());
    }

    #[test]
    fn test_credential_never_serialized() {
        let mut item = NewUploadRequest::new(SourceKind::Mapillary, "123", "A.jpg");
        item.credential = Some("secret-token".to_string());
        let json = serde_json::to_string(&item).unwrap();
        assert!(!json.contains("secret-token"));
    }
}
