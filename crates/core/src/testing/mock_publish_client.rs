//! Mock remote publish client for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::remote::{
    file_page_url, ChunkResponse, ChunkUpload, CommitRequest, MetadataEdit, PublishClient,
    PublishedFile, RemoteEntity, RemoteError, TitleCheck,
};

/// A recorded chunk upload for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedChunk {
    pub credential: String,
    pub filename: String,
    pub offset: u64,
    pub filesize: u64,
    pub len: usize,
    pub filekey: Option<String>,
}

/// Mock implementation of the PublishClient trait.
///
/// Stashed chunks are assembled per file key so tests can inspect the
/// uploaded bytes. Duplicate warnings, blacklisted titles, existing entities
/// and failures are all configurable.
#[derive(Debug, Default)]
pub struct MockPublishClient {
    groups: Arc<RwLock<HashMap<String, Vec<String>>>>,
    group_lookups: Arc<RwLock<u32>>,
    blacklist: Arc<RwLock<HashMap<String, String>>>,
    duplicates: Arc<RwLock<HashMap<String, Vec<String>>>>,
    chunks: Arc<RwLock<Vec<RecordedChunk>>>,
    stash: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    commits: Arc<RwLock<Vec<CommitRequest>>>,
    entities: Arc<RwLock<HashMap<String, Option<RemoteEntity>>>>,
    metadata_writes: Arc<RwLock<Vec<MetadataEdit>>>,
    /// If set, the next call fails with this error.
    next_error: Arc<RwLock<Option<RemoteError>>>,
    /// Operations that always fail.
    failing: Arc<RwLock<HashMap<&'static str, RemoteError>>>,
}

impl MockPublishClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_groups(&self, credential: &str, groups: &[&str]) {
        self.groups.write().await.insert(
            credential.to_string(),
            groups.iter().map(|g| g.to_string()).collect(),
        );
    }

    pub async fn group_lookups(&self) -> u32 {
        *self.group_lookups.read().await
    }

    pub async fn blacklist_title(&self, title: &str, reason: &str) {
        self.blacklist
            .write()
            .await
            .insert(title.to_string(), reason.to_string());
    }

    /// Report `existing` as duplicates when the final chunk of `filename` arrives.
    pub async fn set_duplicates(&self, filename: &str, existing: &[&str]) {
        self.duplicates.write().await.insert(
            filename.to_string(),
            existing.iter().map(|t| t.to_string()).collect(),
        );
    }

    /// Structured metadata of an existing file; `None` means it has none.
    pub async fn set_entity(&self, title: &str, entity: Option<RemoteEntity>) {
        self.entities
            .write()
            .await
            .insert(title.to_string(), entity);
    }

    pub async fn set_next_error(&self, error: RemoteError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every call of `operation` fail.
    pub async fn fail_operation(&self, operation: &'static str, error: RemoteError) {
        self.failing.write().await.insert(operation, error);
    }

    pub async fn chunks(&self) -> Vec<RecordedChunk> {
        self.chunks.read().await.clone()
    }

    /// Bytes stashed under a file key.
    pub async fn stashed(&self, filekey: &str) -> Option<Vec<u8>> {
        self.stash.read().await.get(filekey).cloned()
    }

    pub async fn commits(&self) -> Vec<CommitRequest> {
        self.commits.read().await.clone()
    }

    pub async fn metadata_writes(&self) -> Vec<MetadataEdit> {
        self.metadata_writes.read().await.clone()
    }

    async fn check_error(&self, operation: &'static str) -> Result<(), RemoteError> {
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        if let Some(error) = self.failing.read().await.get(operation) {
            return Err(error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl PublishClient for MockPublishClient {
    async fn user_groups(&self, credential: &str) -> Result<Vec<String>, RemoteError> {
        *self.group_lookups.write().await += 1;
        self.check_error("user_groups").await?;
        Ok(self
            .groups
            .read()
            .await
            .get(credential)
            .cloned()
            .unwrap_or_default())
    }

    async fn check_title(&self, _credential: &str, title: &str) -> Result<TitleCheck, RemoteError> {
        self.check_error("check_title").await?;
        Ok(match self.blacklist.read().await.get(title) {
            Some(reason) => TitleCheck::Blacklisted {
                reason: reason.clone(),
            },
            None => TitleCheck::Allowed,
        })
    }

    async fn upload_chunk(
        &self,
        credential: &str,
        chunk: ChunkUpload,
    ) -> Result<ChunkResponse, RemoteError> {
        self.check_error("upload_chunk").await?;

        let mut chunks = self.chunks.write().await;
        chunks.push(RecordedChunk {
            credential: credential.to_string(),
            filename: chunk.filename.clone(),
            offset: chunk.offset,
            filesize: chunk.filesize,
            len: chunk.data.len(),
            filekey: chunk.filekey.clone(),
        });

        let filekey = chunk
            .filekey
            .clone()
            .unwrap_or_else(|| format!("stash-{}", chunks.len()));
        let mut stash = self.stash.write().await;
        let stored = stash.entry(filekey.clone()).or_default();
        if stored.len() as u64 != chunk.offset {
            return Err(RemoteError::rejected(
                "stashfailed",
                format!("expected offset {}, got {}", stored.len(), chunk.offset),
            ));
        }
        stored.extend_from_slice(&chunk.data);

        let last = stored.len() as u64 >= chunk.filesize;
        let duplicates = if last {
            self.duplicates
                .read()
                .await
                .get(&chunk.filename)
                .cloned()
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let result = match (last, duplicates.is_empty()) {
            (false, _) => "Continue",
            (true, true) => "Success",
            (true, false) => "Warning",
        };

        Ok(ChunkResponse {
            filekey: Some(filekey),
            result: result.to_string(),
            duplicates,
        })
    }

    async fn commit(
        &self,
        _credential: &str,
        request: CommitRequest,
    ) -> Result<PublishedFile, RemoteError> {
        self.check_error("commit").await?;
        if !self.stash.read().await.contains_key(&request.filekey) {
            return Err(RemoteError::rejected(
                "stashfilenotfound",
                format!("no stashed file {}", request.filekey),
            ));
        }
        let published = PublishedFile {
            title: request.filename.clone(),
            url: self.file_url(&request.filename),
        };
        self.commits.write().await.push(request);
        Ok(published)
    }

    async fn fetch_entity_by_title(
        &self,
        _credential: &str,
        title: &str,
    ) -> Result<Option<RemoteEntity>, RemoteError> {
        self.check_error("fetch_entity").await?;
        match self.entities.read().await.get(title) {
            Some(entity) => Ok(entity.clone()),
            None => Err(RemoteError::rejected(
                "missingtitle",
                format!("file {} does not exist", title),
            )),
        }
    }

    async fn write_metadata(
        &self,
        _credential: &str,
        edit: MetadataEdit,
    ) -> Result<(), RemoteError> {
        self.check_error("write_metadata").await?;
        self.metadata_writes.write().await.push(edit);
        Ok(())
    }

    fn file_url(&self, title: &str) -> String {
        file_page_url("https://commons.example.org", title)
    }
}
