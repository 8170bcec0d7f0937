use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Batch not found: {0}")]
    NotFound(i64),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Result of a retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    /// Batch holding the copies, absent when nothing was retried.
    pub new_batch_id: Option<i64>,
    pub retried: usize,
    pub requested: usize,
}

/// Result of a cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub batch_id: i64,
    pub cancelled: usize,
    pub message: String,
}
