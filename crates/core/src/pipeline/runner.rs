//! Single pass of one upload request from source bytes to a terminal status.

use bytes::Bytes;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::temp::TempFileGuard;
use crate::dispatcher::DispatchTask;
use crate::events::{StatusUpdate, UpdateCallback};
use crate::metadata::merge_statements;
use crate::metrics::{BYTES_STASHED, PIPELINE_DURATION, PIPELINE_OUTCOMES, STALE_TASKS};
use crate::remote::{
    ChunkUpload, CommitRequest, MetadataEdit, PublishClient, RemoteConfig, TitleCheck,
};
use crate::source::{MediaItem, SourceHandler, SourceRegistry};
use crate::store::{
    Completion, DuplicateLink, StructuredError, UploadRequest, UploadStatus, UploadStore,
};

/// Bytes of an original written to disk.
#[derive(Debug)]
struct Download {
    size: u64,
    sha256: String,
}

/// A fully stashed upload.
#[derive(Debug)]
struct Stashed {
    filekey: String,
    duplicates: Vec<String>,
}

pub struct UploadPipeline {
    store: Arc<dyn UploadStore>,
    sources: Arc<SourceRegistry>,
    publisher: Arc<dyn PublishClient>,
    remote: RemoteConfig,
    config: PipelineConfig,
    on_update: Option<UpdateCallback>,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn UploadStore>,
        sources: Arc<SourceRegistry>,
        publisher: Arc<dyn PublishClient>,
        remote: RemoteConfig,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            sources,
            publisher,
            remote,
            config,
            on_update: None,
        }
    }

    /// Set a callback invoked whenever a request changes status.
    pub fn with_update_callback(mut self, callback: UpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    /// Run the task's request to a terminal status.
    ///
    /// Returns the status written, or `None` when the request was no longer
    /// queued for this task or the store could not record the outcome.
    pub async fn run(&self, task: &DispatchTask) -> Option<UploadStatus> {
        let request = match self.store.begin_processing(task.request_id, &task.handle) {
            Ok(Some(request)) => request,
            Ok(None) => {
                STALE_TASKS.inc();
                info!(
                    request_id = task.request_id,
                    handle = %task.handle,
                    "Request no longer queued for this task, skipping"
                );
                return None;
            }
            Err(e) => {
                error!(request_id = task.request_id, error = %e, "Failed to start request");
                return None;
            }
        };

        let started = Instant::now();
        info!(
            request_id = request.id,
            batch_id = request.batch_id,
            key = %request.key,
            lane = %task.lane,
            "Processing upload"
        );
        self.emit(StatusUpdate::from_request(&request));

        let completion = match self.execute(&request, &task.edit_group_id).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(request_id = request.id, error = %e, "Upload failed");
                Completion::failed(StructuredError::error(e.to_string()))
            }
        };

        let recorded = match self.store.finish(request.id, &completion) {
            Ok(true) => true,
            Ok(false) => {
                warn!(request_id = request.id, "Request left in_progress before finish");
                false
            }
            Err(e) => {
                error!(request_id = request.id, error = %e, "Failed to record outcome");
                false
            }
        };

        if let Err(e) = self.store.clear_credential(request.id) {
            error!(request_id = request.id, error = %e, "Failed to clear credential");
        }

        let status = completion.status.as_str();
        PIPELINE_OUTCOMES.with_label_values(&[status]).inc();
        PIPELINE_DURATION
            .with_label_values(&[status])
            .observe(started.elapsed().as_secs_f64());

        if !recorded {
            return None;
        }

        info!(
            request_id = request.id,
            status = status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Upload finished"
        );
        self.emit(StatusUpdate {
            batch_id: request.batch_id,
            request_id: request.id,
            key: request.key.clone(),
            status: completion.status,
            error: completion.error,
            success: completion.success,
        });
        Some(completion.status)
    }

    fn emit(&self, update: StatusUpdate) {
        if let Some(ref callback) = self.on_update {
            callback(update);
        }
    }

    async fn execute(
        &self,
        request: &UploadRequest,
        edit_group_id: &str,
    ) -> Result<Completion, PipelineError> {
        let credential = request
            .credential
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(PipelineError::MissingCredential)?;

        let handler = self.sources.get(request.source)?;
        let item = handler.fetch_image_metadata(&request.key).await?;

        let temp = TempFileGuard::new(&self.config.temp_dir(), &format!("upload-{}", request.id));
        let download = download(handler.as_ref(), &item, temp.path()).await?;
        debug!(
            request_id = request.id,
            size = download.size,
            sha256 = %download.sha256,
            "Original downloaded"
        );

        match self.publisher.check_title(credential, &request.title).await {
            Ok(TitleCheck::Allowed) => {}
            Ok(TitleCheck::Blacklisted { reason }) => {
                return Err(PipelineError::Blacklisted(reason));
            }
            Err(e) => {
                warn!(request_id = request.id, error = %e, "Title check failed, continuing");
            }
        }

        let stashed = self
            .stash(credential, &request.title, temp.path(), &download)
            .await?;

        if !stashed.duplicates.is_empty() {
            return self
                .merge_into_duplicate(credential, request, &stashed.duplicates, edit_group_id)
                .await;
        }

        let summary = self.edit_summary(request, edit_group_id);
        let published = self
            .publisher
            .commit(
                credential,
                CommitRequest {
                    filekey: stashed.filekey,
                    filename: request.title.clone(),
                    wikitext: request.wikitext.clone().unwrap_or_default(),
                    comment: summary.clone(),
                },
            )
            .await?;

        if !request.statements.is_empty() || !request.labels.is_empty() {
            let edit = MetadataEdit {
                title: published.title.clone(),
                statements: request.statements.clone(),
                labels: request.labels.clone(),
                summary,
            };
            if let Err(e) = self.publisher.write_metadata(credential, edit).await {
                warn!(
                    request_id = request.id,
                    title = %published.title,
                    error = %e,
                    "Failed to attach structured metadata"
                );
            }
        }

        Ok(Completion::completed(published.url))
    }

    /// Upload the temp file chunk by chunk, verifying it still hashes to
    /// the downloaded digest before the final chunk is sent.
    async fn stash(
        &self,
        credential: &str,
        filename: &str,
        path: &Path,
        download: &Download,
    ) -> Result<Stashed, PipelineError> {
        let chunk_size = self.remote.chunk_size_bytes.max(1);
        let mut file = File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut offset = 0u64;
        let mut filekey: Option<String> = None;

        loop {
            let mut buf = Vec::with_capacity(chunk_size);
            (&mut file)
                .take(chunk_size as u64)
                .read_to_end(&mut buf)
                .await?;
            if buf.is_empty() {
                return Err(PipelineError::Io(format!(
                    "temp file ended at {} of {} bytes",
                    offset, download.size
                )));
            }

            hasher.update(&buf);
            let len = buf.len() as u64;
            let last = offset + len >= download.size;
            if last {
                let actual = format!("{:x}", hasher.clone().finalize());
                if actual != download.sha256 {
                    return Err(PipelineError::HashMismatch {
                        expected: download.sha256.clone(),
                        actual,
                    });
                }
            }

            let response = self
                .publisher
                .upload_chunk(
                    credential,
                    ChunkUpload {
                        filename: filename.to_string(),
                        offset,
                        filesize: download.size,
                        filekey: filekey.clone(),
                        data: Bytes::from(buf),
                    },
                )
                .await?;
            BYTES_STASHED.inc_by(len);
            offset += len;
            if response.filekey.is_some() {
                filekey = response.filekey;
            }

            if last {
                return Ok(Stashed {
                    filekey: filekey.ok_or(PipelineError::MissingFileKey)?,
                    duplicates: response.duplicates,
                });
            }
        }
    }

    /// Merge the request's statements into the first duplicate instead of publishing.
    async fn merge_into_duplicate(
        &self,
        credential: &str,
        request: &UploadRequest,
        duplicates: &[String],
        edit_group_id: &str,
    ) -> Result<Completion, PipelineError> {
        let target = &duplicates[0];
        info!(
            request_id = request.id,
            duplicate = %target,
            "Duplicate detected, merging metadata"
        );

        let existing = self
            .publisher
            .fetch_entity_by_title(credential, target)
            .await?
            .map(|entity| entity.statements)
            .unwrap_or_default();
        let merged = merge_statements(&existing, &request.statements);

        if merged.changed {
            self.publisher
                .write_metadata(
                    credential,
                    MetadataEdit {
                        title: target.clone(),
                        statements: merged.statements,
                        labels: Vec::new(),
                        summary: self.edit_summary(request, edit_group_id),
                    },
                )
                .await?;
        }

        let links = duplicates
            .iter()
            .map(|title| DuplicateLink {
                title: title.clone(),
                url: self.publisher.file_url(title),
            })
            .collect();
        let message = format!(
            "File {} already exists as {}",
            request.title,
            duplicates.join(", ")
        );
        Ok(Completion::duplicate(
            merged.changed,
            StructuredError::Duplicate { message, links },
        ))
    }

    fn edit_summary(&self, request: &UploadRequest, edit_group_id: &str) -> String {
        format!(
            "{} from {} image {} (batch {}, edit group {})",
            self.remote.edit_summary, request.source, request.key, request.batch_id, edit_group_id
        )
    }
}

/// Stream the original into `path`, hashing as it goes.
async fn download(
    handler: &dyn SourceHandler,
    item: &MediaItem,
    path: &Path,
) -> Result<Download, PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut stream = handler.open_original(item).await?;
    let mut file = File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;

    if size == 0 {
        return Err(PipelineError::EmptyFile);
    }

    Ok(Download {
        size,
        sha256: format!("{:x}", hasher.finalize()),
    })
}
