use async_trait::async_trait;

use super::types::{
    ChunkResponse, ChunkUpload, CommitRequest, MetadataEdit, PublishedFile, RemoteEntity,
    RemoteError, TitleCheck,
};

/// Client for the remote content repository.
///
/// Every call acts on behalf of the user owning `credential`.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Groups the user belongs to.
    async fn user_groups(&self, credential: &str) -> Result<Vec<String>, RemoteError>;

    /// Whether a file with this name may be created.
    async fn check_title(&self, credential: &str, title: &str) -> Result<TitleCheck, RemoteError>;

    /// Upload one chunk into the user's stash.
    async fn upload_chunk(
        &self,
        credential: &str,
        chunk: ChunkUpload,
    ) -> Result<ChunkResponse, RemoteError>;

    /// Publish a stashed file.
    async fn commit(
        &self,
        credential: &str,
        request: CommitRequest,
    ) -> Result<PublishedFile, RemoteError>;

    /// Structured metadata of an existing file, `None` when it has none.
    async fn fetch_entity_by_title(
        &self,
        credential: &str,
        title: &str,
    ) -> Result<Option<RemoteEntity>, RemoteError>;

    async fn write_metadata(&self, credential: &str, edit: MetadataEdit)
        -> Result<(), RemoteError>;

    /// Public URL of a file page.
    fn file_url(&self, title: &str) -> String;
}
