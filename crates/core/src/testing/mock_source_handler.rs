//! Mock source handler for testing.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::source::{ByteStream, MediaItem, SourceError, SourceHandler, SourceKind};

const STREAM_CHUNK: usize = 1024;

/// How `fetch_collection` fails when a listing failure is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFailure {
    Timeout,
    Status(u16),
}

/// Mock implementation of the SourceHandler trait.
///
/// Items and their bytes are registered up front; `open_original` streams
/// the bytes in small chunks.
#[derive(Debug, Default)]
pub struct MockSourceHandler {
    items: Arc<RwLock<HashMap<String, MediaItem>>>,
    content: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    collections: Arc<RwLock<HashMap<String, Vec<String>>>>,
    existing: Arc<RwLock<HashSet<String>>>,
    /// Items whose stream breaks after the first chunk.
    broken_streams: Arc<RwLock<HashSet<String>>>,
    opened: Arc<RwLock<Vec<String>>>,
    listing_failure: Arc<RwLock<Option<ListingFailure>>>,
    batch_calls: Arc<RwLock<Vec<usize>>>,
}

impl MockSourceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_item(&self, item: MediaItem, content: Vec<u8>) {
        if let Some(ref collection) = item.collection {
            self.collections
                .write()
                .await
                .entry(collection.clone())
                .or_default()
                .push(item.id.clone());
        }
        self.content.write().await.insert(item.id.clone(), content);
        self.items.write().await.insert(item.id.clone(), item);
    }

    /// Mark an item as already present on the remote repository.
    pub async fn mark_existing(&self, id: &str) {
        self.existing.write().await.insert(id.to_string());
    }

    pub async fn break_stream(&self, id: &str) {
        self.broken_streams.write().await.insert(id.to_string());
    }

    /// Make every `fetch_collection` call fail. Id listing and batches still work.
    pub async fn fail_collection_listing(&self, failure: ListingFailure) {
        *self.listing_failure.write().await = Some(failure);
    }

    /// Sizes of the `fetch_batch` calls made so far.
    pub async fn batch_calls(&self) -> Vec<usize> {
        self.batch_calls.read().await.clone()
    }

    /// Ids whose originals were opened, in order.
    pub async fn opened(&self) -> Vec<String> {
        self.opened.read().await.clone()
    }
}

#[async_trait]
impl SourceHandler for MockSourceHandler {
    fn kind(&self) -> SourceKind {
        SourceKind::Mapillary
    }

    async fn fetch_collection(&self, collection: &str) -> Result<Vec<MediaItem>, SourceError> {
        match *self.listing_failure.read().await {
            Some(ListingFailure::Timeout) => {
                return Err(SourceError::Timeout("operation timed out".to_string()))
            }
            Some(ListingFailure::Status(status)) => {
                return Err(SourceError::Status {
                    status,
                    body: "listing failed".to_string(),
                })
            }
            None => {}
        }
        let ids = self.fetch_collection_ids(collection).await?;
        let items = self.items.read().await;
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn fetch_image_metadata(&self, id: &str) -> Result<MediaItem, SourceError> {
        self.items
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    async fn fetch_existing(&self, ids: &[String]) -> Result<HashSet<String>, SourceError> {
        let existing = self.existing.read().await;
        Ok(ids.iter().filter(|id| existing.contains(*id)).cloned().collect())
    }

    async fn fetch_collection_ids(&self, collection: &str) -> Result<Vec<String>, SourceError> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(collection.to_string()))
    }

    async fn fetch_batch(
        &self,
        _collection: &str,
        ids: &[String],
    ) -> Result<Vec<MediaItem>, SourceError> {
        self.batch_calls.write().await.push(ids.len());
        let items = self.items.read().await;
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn open_original(&self, item: &MediaItem) -> Result<ByteStream, SourceError> {
        self.opened.write().await.push(item.id.clone());

        let content = self
            .content
            .read()
            .await
            .get(&item.id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(item.id.clone()))?;

        let mut chunks: Vec<Result<Bytes, SourceError>> = content
            .chunks(STREAM_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if self.broken_streams.read().await.contains(&item.id) {
            chunks.truncate(1);
            chunks.push(Err(SourceError::Http("connection reset".to_string())));
        }

        Ok(Box::pin(stream::iter(chunks)))
    }
}
