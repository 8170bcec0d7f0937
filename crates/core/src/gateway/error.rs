use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::manager::ManagerError;
use crate::source::SourceError;
use crate::store::StoreError;

/// Errors rendered to the client as `error` messages.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Batch {0} not found")]
    BatchNotFound(i64),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Slice has {count} items, the maximum is {max}")]
    SliceTooLarge { count: usize, max: usize },

    #[error("{0}")]
    Rejected(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

impl From<ManagerError> for GatewayError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::NotFound(id) => GatewayError::BatchNotFound(id),
            ManagerError::PermissionDenied(_) => GatewayError::PermissionDenied,
            ManagerError::Store(e) => GatewayError::Store(e),
            ManagerError::Dispatch(e) => GatewayError::Dispatch(e),
        }
    }
}
