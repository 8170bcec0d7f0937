//! Upload storage trait and errors.

use thiserror::Error;

use super::cipher::CipherError;
use super::types::{
    Batch, BatchStats, BatchSummary, CancelledRequest, Completion, NewUploadRequest, Preset,
    PresetDraft, RetryCopy, RetrySelection, UploadRequest, UploadStatus,
};
use crate::source::SourceKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload request {0} already has a task handle")]
    AlreadyDispatched(i64),

    #[error("Cannot {operation} upload request {request_id}: current status is {current_status}")]
    InvalidState {
        request_id: i64,
        current_status: UploadStatus,
        operation: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Credential error: {0}")]
    Credential(#[from] CipherError),
}

/// Filter for listing batches.
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub user_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl BatchFilter {
    pub fn new() -> Self {
        Self {
            user_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable batches and upload requests.
///
/// Every status transition is a conditional update: an operation that finds
/// the row in an unexpected status changes nothing.
pub trait UploadStore: Send + Sync {
    /// Create an empty batch owned by `user_id`.
    fn create_batch(&self, user_id: &str, edit_group_id: &str) -> Result<Batch, StoreError>;

    fn get_batch(&self, id: i64) -> Result<Option<Batch>, StoreError>;

    /// Batches matching the filter, newest first, with stats attached.
    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<BatchSummary>, StoreError>;

    fn count_batches(&self, filter: &BatchFilter) -> Result<i64, StoreError>;

    fn batch_stats(&self, batch_id: i64) -> Result<BatchStats, StoreError>;

    /// Insert queued requests into a batch in one transaction.
    fn create_requests(
        &self,
        batch_id: i64,
        user_id: &str,
        items: &[NewUploadRequest],
    ) -> Result<Vec<UploadRequest>, StoreError>;

    fn get_request(&self, id: i64) -> Result<Option<UploadRequest>, StoreError>;

    /// Requests of a batch in creation order.
    fn list_requests(&self, batch_id: i64) -> Result<Vec<UploadRequest>, StoreError>;

    /// Requests in `status` across all batches, oldest first.
    fn list_requests_by_status(&self, status: UploadStatus)
        -> Result<Vec<UploadRequest>, StoreError>;

    /// Record the task handle of a queued request that has none yet.
    fn attach_task_handle(&self, id: i64, handle: &str) -> Result<(), StoreError>;

    /// Remove a handle again if it is still the recorded one.
    fn detach_task_handle(&self, id: i64, handle: &str) -> Result<bool, StoreError>;

    /// Move a queued request carrying `handle` to in progress.
    ///
    /// Returns `None` when the request is no longer queued or the handle does not match.
    fn begin_processing(&self, id: i64, handle: &str)
        -> Result<Option<UploadRequest>, StoreError>;

    /// Move an in-progress request to a terminal status, clearing its handle and credential.
    ///
    /// Returns false when the request was not in progress.
    fn finish(&self, id: i64, completion: &Completion) -> Result<bool, StoreError>;

    fn clear_credential(&self, id: i64) -> Result<(), StoreError>;

    /// Cancel every still-queued request of a batch in one transaction.
    fn cancel_queued(&self, batch_id: i64) -> Result<Vec<CancelledRequest>, StoreError>;

    /// Copy the selected failed requests into a new batch.
    ///
    /// Returns `None`, creating nothing, when no selected request qualifies.
    fn retry_into_new_batch(
        &self,
        selection: &RetrySelection,
    ) -> Result<Option<RetryCopy>, StoreError>;

    /// Create a preset, or update `preset_id` when given.
    ///
    /// Returns `None` when the preset to update does not exist or belongs to
    /// another user. Saving a default clears the other defaults of the same
    /// user and source.
    fn save_preset(
        &self,
        user_id: &str,
        preset_id: Option<i64>,
        draft: &PresetDraft,
    ) -> Result<Option<Preset>, StoreError>;

    fn get_preset(&self, id: i64) -> Result<Option<Preset>, StoreError>;

    /// Presets of a user for one source, newest first.
    fn list_presets(&self, user_id: &str, source: SourceKind) -> Result<Vec<Preset>, StoreError>;

    /// Delete a preset owned by `user_id`. Returns false when nothing was deleted.
    fn delete_preset(&self, id: i64, user_id: &str) -> Result<bool, StoreError>;
}
