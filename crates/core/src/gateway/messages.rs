//! Wire messages of the real-time channel. JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use super::error::GatewayError;
use crate::events::StatusUpdate;
use crate::metadata::{Label, Statement};
use crate::source::{MediaItem, SourceKind};
use crate::store::{Batch, BatchSummary, NewUploadRequest, Preset, PresetDraft, UploadRequest};

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateBatch,
    UploadSlice {
        batch_id: i64,
        slice_id: u64,
        handler: SourceKind,
        items: Vec<SliceItem>,
    },
    SubscribeBatch {
        batch_id: i64,
    },
    UnsubscribeBatch {
        #[serde(default)]
        batch_id: Option<i64>,
    },
    RetryUploads {
        batch_id: i64,
    },
    CancelBatch {
        batch_id: i64,
    },
    FetchBatches {
        #[serde(default)]
        limit: Option<i64>,
        #[serde(default)]
        offset: Option<i64>,
    },
    FetchBatchUploads {
        batch_id: i64,
    },
    /// Stop the `batches_list` updates started by `fetch_batches`.
    UnsubscribeBatchesList,
    FetchImages {
        handler: SourceKind,
        collection: String,
    },
    /// Create a preset, or update `preset_id` when given.
    SavePreset {
        #[serde(default)]
        preset_id: Option<i64>,
        preset: PresetDraft,
    },
    FetchPresets {
        handler: SourceKind,
    },
    DeletePreset {
        preset_id: i64,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| GatewayError::InvalidMessage(e.to_string()))
    }

    /// Message type name, for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateBatch => "create_batch",
            ClientMessage::UploadSlice { .. } => "upload_slice",
            ClientMessage::SubscribeBatch { .. } => "subscribe_batch",
            ClientMessage::UnsubscribeBatch { .. } => "unsubscribe_batch",
            ClientMessage::RetryUploads { .. } => "retry_uploads",
            ClientMessage::CancelBatch { .. } => "cancel_batch",
            ClientMessage::FetchBatches { .. } => "fetch_batches",
            ClientMessage::FetchBatchUploads { .. } => "fetch_batch_uploads",
            ClientMessage::UnsubscribeBatchesList => "unsubscribe_batches_list",
            ClientMessage::FetchImages { .. } => "fetch_images",
            ClientMessage::SavePreset { .. } => "save_preset",
            ClientMessage::FetchPresets { .. } => "fetch_presets",
            ClientMessage::DeletePreset { .. } => "delete_preset",
        }
    }
}

/// One item of an upload slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceItem {
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub wikitext: Option<String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl SliceItem {
    pub fn into_request(self, source: SourceKind, credential: Option<String>) -> NewUploadRequest {
        NewUploadRequest {
            source,
            key: self.key,
            collection: self.collection,
            title: self.title,
            wikitext: self.wikitext,
            statements: self.statements,
            labels: self.labels,
            credential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceItemStatus {
    Queued,
    Rejected,
}

/// Initial status of one slice item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceAckItem {
    pub key: String,
    pub status: SliceItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    BatchCreated {
        batch_id: i64,
        edit_group_id: String,
    },
    UploadSliceAck {
        batch_id: i64,
        slice_id: u64,
        items: Vec<SliceAckItem>,
    },
    Subscribed {
        batch_id: i64,
    },
    Unsubscribed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_id: Option<i64>,
    },
    UploadsUpdate {
        batch_id: i64,
        items: Vec<StatusUpdate>,
    },
    UploadsComplete {
        batch_id: i64,
    },
    RetryStarted {
        batch_id: i64,
        new_batch_id: i64,
        retried: usize,
    },
    BatchCancelled {
        batch_id: i64,
        cancelled: usize,
        message: String,
    },
    /// A page of the caller's batches. `partial` lists only the batches
    /// that changed since the last list.
    BatchesList {
        items: Vec<BatchSummary>,
        total: i64,
        #[serde(default)]
        partial: bool,
    },
    BatchUploadsList {
        batch: Batch,
        uploads: Vec<UploadRequest>,
    },
    CollectionImages {
        collection: String,
        items: Vec<MediaItem>,
        /// Ids already present on the remote repository.
        existing: Vec<String>,
    },
    /// The collection was too large to list at once and follows in pages.
    TryBatchRetrieval {
        message: String,
    },
    CollectionImageIds {
        collection: String,
        ids: Vec<String>,
    },
    PartialCollectionImages {
        collection: String,
        items: Vec<MediaItem>,
        existing: Vec<String>,
    },
    PresetsList {
        handler: SourceKind,
        presets: Vec<Preset>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::BatchCreated { .. } => "batch_created",
            ServerMessage::UploadSliceAck { .. } => "upload_slice_ack",
            ServerMessage::Subscribed { .. } => "subscribed",
            ServerMessage::Unsubscribed { .. } => "unsubscribed",
            ServerMessage::UploadsUpdate { .. } => "uploads_update",
            ServerMessage::UploadsComplete { .. } => "uploads_complete",
            ServerMessage::RetryStarted { .. } => "retry_started",
            ServerMessage::BatchCancelled { .. } => "batch_cancelled",
            ServerMessage::BatchesList { .. } => "batches_list",
            ServerMessage::BatchUploadsList { .. } => "batch_uploads_list",
            ServerMessage::CollectionImages { .. } => "collection_images",
            ServerMessage::TryBatchRetrieval { .. } => "try_batch_retrieval",
            ServerMessage::CollectionImageIds { .. } => "collection_image_ids",
            ServerMessage::PartialCollectionImages { .. } => "partial_collection_images",
            ServerMessage::PresetsList { .. } => "presets_list",
            ServerMessage::Error { .. } => "error",
        }
    }
}
