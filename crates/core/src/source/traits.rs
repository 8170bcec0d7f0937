use async_trait::async_trait;
use std::collections::HashSet;

use super::types::{ByteStream, MediaItem, SourceError, SourceKind};

/// A provider of candidate media items.
///
/// Implementations are selected by [`SourceKind`] through the
/// [`SourceRegistry`](super::SourceRegistry).
#[async_trait]
pub trait SourceHandler: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// All items of a collection, in capture order.
    async fn fetch_collection(&self, collection: &str) -> Result<Vec<MediaItem>, SourceError>;

    async fn fetch_image_metadata(&self, id: &str) -> Result<MediaItem, SourceError>;

    /// Ids among `ids` that are already present on the remote repository.
    async fn fetch_existing(&self, ids: &[String]) -> Result<HashSet<String>, SourceError>;

    async fn fetch_collection_ids(&self, collection: &str) -> Result<Vec<String>, SourceError>;

    /// Items among `ids`, which belong to `collection`. Unknown ids are skipped.
    async fn fetch_batch(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<MediaItem>, SourceError>;

    /// Stream the original bytes of an item.
    async fn open_original(&self, item: &MediaItem) -> Result<ByteStream, SourceError>;
}
