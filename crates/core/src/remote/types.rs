//! Remote publish client types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::{Label, Statement};

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Transport failure worth retrying (timeouts, connection errors, 5xx, 429).
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// The remote refused the operation.
    #[error("Remote rejected request ({code}): {info}")]
    Rejected { code: String, info: String },

    /// The remote answered with something unexpected.
    #[error("Remote protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn rejected(code: impl Into<String>, info: impl Into<String>) -> Self {
        RemoteError::Rejected {
            code: code.into(),
            info: info.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::Transient(_) => "transient",
            RemoteError::Rejected { .. } => "rejected",
            RemoteError::Protocol(_) => "protocol",
        }
    }
}

/// Result of asking whether a title may be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleCheck {
    Allowed,
    Blacklisted { reason: String },
}

/// One chunk of a stashed upload.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub filename: String,
    pub offset: u64,
    pub filesize: u64,
    /// Stash key returned by the previous chunk.
    pub filekey: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkResponse {
    pub filekey: Option<String>,
    pub result: String,
    /// Titles of existing files with identical content.
    pub duplicates: Vec<String>,
}

/// Publish a fully stashed file under its final name.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub filekey: String,
    pub filename: String,
    pub wikitext: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub title: String,
    pub url: String,
}

/// Structured metadata of an existing file.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub id: String,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct MetadataEdit {
    /// File name without namespace.
    pub title: String,
    pub statements: Vec<Statement>,
    pub labels: Vec<Label>,
    pub summary: String,
}
