use thiserror::Error;

use crate::remote::RemoteError;
use crate::source::SourceError;
use crate::store::StoreError;

/// Reasons a pipeline run fails. Recorded on the request, never returned to clients.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing access token")]
    MissingCredential,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Downloaded file is empty")]
    EmptyFile,

    #[error("hash mismatch: downloaded {expected}, uploaded {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Title is blacklisted: {0}")]
    Blacklisted(String),

    #[error("Remote returned no file key for the stashed upload")]
    MissingFileKey,
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}
