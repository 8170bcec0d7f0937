//! Durable state for batches and upload requests.

mod cipher;
mod sqlite;
mod store;
mod types;

pub use cipher::{CipherError, CredentialCipher};
pub use sqlite::SqliteUploadStore;
pub use store::{BatchFilter, StoreError, UploadStore};
pub use types::{
    Batch, BatchStats, BatchSummary, CancelledRequest, Completion, DuplicateLink,
    NewUploadRequest, Preset, PresetDraft, RetryCopy, RetrySelection, StructuredError,
    UploadRequest, UploadStatus,
};
