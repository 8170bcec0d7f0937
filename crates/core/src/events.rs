//! Status updates emitted whenever an upload request changes status.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{StructuredError, UploadRequest, UploadStatus};

/// Current status of one upload request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub batch_id: i64,
    pub request_id: i64,
    pub key: String,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
}

impl StatusUpdate {
    pub fn from_request(request: &UploadRequest) -> Self {
        Self {
            batch_id: request.batch_id,
            request_id: request.id,
            key: request.key.clone(),
            status: request.status,
            error: request.error.clone(),
            success: request.success.clone(),
        }
    }
}

/// Callback invoked for every status update.
pub type UpdateCallback = Arc<dyn Fn(StatusUpdate) + Send + Sync>;
