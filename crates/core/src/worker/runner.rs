//! Background workers draining the two dispatch lanes.
//!
//! Each worker handles one task at a time: it waits for the next due task of
//! its lane and runs the pipeline for it to a terminal status. Privileged and
//! normal lanes have separate worker counts so normal traffic never starves
//! privileged uploads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::WorkerConfig;
use crate::dispatcher::{DispatchTask, Lane, TaskDispatcher, TaskQueue};
use crate::events::{StatusUpdate, UpdateCallback};
use crate::pipeline::UploadPipeline;
use crate::store::{
    Completion, StoreError, StructuredError, UploadRequest, UploadStatus, UploadStore,
};

/// Error recorded on requests whose pipeline run was cut short by a restart.
pub const INTERRUPTED_MESSAGE: &str = "Upload interrupted by a restart";

/// Pause after a queue error before polling again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Current state of the worker pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub privileged_workers: usize,
    pub normal_workers: usize,
    /// Workers currently running a pipeline.
    pub busy: usize,
    pub queued_privileged: usize,
    pub queued_normal: usize,
}

/// What restart recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// In-progress requests finished as failed.
    pub interrupted: usize,
    /// Queued requests enqueued again.
    pub requeued: usize,
}

/// Store and dispatcher used to recover requests left behind by a previous run.
struct Recovery {
    store: Arc<dyn UploadStore>,
    dispatcher: Arc<TaskDispatcher>,
}

pub struct UploadWorkers {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    pipeline: Arc<UploadPipeline>,
    recovery: Option<Recovery>,
    on_update: Option<UpdateCallback>,

    // Runtime state
    running: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl UploadWorkers {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        pipeline: Arc<UploadPipeline>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            pipeline,
            recovery: None,
            on_update: None,
            running: Arc::new(AtomicBool::new(false)),
            busy: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Recover interrupted and orphaned requests on every start.
    pub fn with_recovery(
        mut self,
        store: Arc<dyn UploadStore>,
        dispatcher: Arc<TaskDispatcher>,
    ) -> Self {
        self.recovery = Some(Recovery { store, dispatcher });
        self
    }

    /// Set a callback invoked for every request recovery finishes as failed.
    pub fn with_update_callback(mut self, callback: UpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    /// Start the workers (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Already running");
            return;
        }

        info!(
            privileged = self.config.privileged,
            normal = self.config.normal,
            "Starting upload workers"
        );

        // Rows left behind by a previous process
        match self.recover().await {
            Ok(report) if report != RecoveryReport::default() => {
                info!(
                    interrupted = report.interrupted,
                    requeued = report.requeued,
                    "Recovered upload requests"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to recover upload requests"),
        }

        for id in 0..self.config.privileged {
            self.spawn_worker(Lane::Privileged, id);
        }
        for id in 0..self.config.normal {
            self.spawn_worker(Lane::Normal, id);
        }
    }

    /// Stop the workers gracefully. A pipeline already running is not interrupted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Not running");
            return;
        }

        info!("Stopping upload workers");

        let _ = self.shutdown_tx.send(());

        // Give workers a moment to finish current work
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("Upload workers stopped");
    }

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            running: self.running.load(Ordering::Relaxed),
            privileged_workers: self.config.privileged,
            normal_workers: self.config.normal,
            busy: self.busy.load(Ordering::Relaxed),
            queued_privileged: self.queue.len(Lane::Privileged).await,
            queued_normal: self.queue.len(Lane::Normal).await,
        }
    }

    /// Fail requests that were in progress and re-dispatch queued requests
    /// the queue no longer holds.
    pub async fn recover(&self) -> Result<RecoveryReport, StoreError> {
        let Some(ref recovery) = self.recovery else {
            return Ok(RecoveryReport::default());
        };
        let store = &recovery.store;
        let mut report = RecoveryReport::default();

        let interrupted = Completion::failed(StructuredError::error(INTERRUPTED_MESSAGE));
        for request in store.list_requests_by_status(UploadStatus::InProgress)? {
            if !store.finish(request.id, &interrupted)? {
                continue;
            }
            report.interrupted += 1;
            warn!(
                request_id = request.id,
                batch_id = request.batch_id,
                "Upload interrupted by restart"
            );
            if let Some(ref callback) = self.on_update {
                if let Some(row) = store.get_request(request.id)? {
                    callback(StatusUpdate::from_request(&row));
                }
            }
        }

        let mut orphans: BTreeMap<i64, Vec<UploadRequest>> = BTreeMap::new();
        for request in store.list_requests_by_status(UploadStatus::Queued)? {
            let orphaned = match request.task_handle {
                Some(ref handle) => {
                    !self.queue.contains(handle).await
                        && store.detach_task_handle(request.id, handle)?
                }
                None => true,
            };
            if orphaned {
                orphans.entry(request.batch_id).or_default().push(request);
            }
        }

        for (batch_id, requests) in orphans {
            let Some(batch) = store.get_batch(batch_id)? else {
                warn!(batch_id = batch_id, "Queued requests without a batch, skipping");
                continue;
            };
            match recovery.dispatcher.dispatch(&requests, &batch.edit_group_id).await {
                Ok(count) => report.requeued += count,
                Err(e) => {
                    error!(batch_id = batch_id, error = %e, "Failed to re-dispatch queued requests")
                }
            }
        }

        Ok(report)
    }

    fn spawn_worker(&self, lane: Lane, id: usize) {
        let running = Arc::clone(&self.running);
        let busy = Arc::clone(&self.busy);
        let queue = Arc::clone(&self.queue);
        let pipeline = Arc::clone(&self.pipeline);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(lane = %lane, worker = id, "Worker started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(lane = %lane, worker = id, "Worker received shutdown signal");
                        break;
                    }
                    next = queue.next(lane) => {
                        if !running.load(Ordering::Relaxed) {
                            if let Ok(task) = next {
                                hand_back(queue.as_ref(), task).await;
                            }
                            break;
                        }
                        match next {
                            Ok(task) => {
                                busy.fetch_add(1, Ordering::Relaxed);
                                pipeline.run(&task).await;
                                busy.fetch_sub(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                warn!(lane = %lane, error = %e, "Queue error");
                                tokio::time::sleep(QUEUE_ERROR_BACKOFF).await;
                            }
                        }
                    }
                }
            }
            debug!(lane = %lane, worker = id, "Worker stopped");
        });
    }
}

/// Return a task taken after shutdown began so it is not lost.
async fn hand_back(queue: &dyn TaskQueue, task: DispatchTask) {
    let request_id = task.request_id;
    match queue.enqueue(task).await {
        Ok(()) => debug!(request_id = request_id, "Returned task to the queue on shutdown"),
        Err(e) => error!(request_id = request_id, error = %e, "Failed to return task to the queue"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InMemoryTaskQueue;
    use crate::pipeline::PipelineConfig;
    use crate::rate_limiter::{InMemorySlotStore, RateLimitConfig, RateLimiter};
    use crate::remote::RemoteConfig;
    use crate::source::SourceRegistry;
    use crate::store::{CredentialCipher, SqliteUploadStore};
    use crate::testing::{fixtures, MockPublishClient, MockSourceHandler};
    use chrono::Utc;
    use std::sync::Mutex;

    fn idle_pipeline(store: Arc<SqliteUploadStore>) -> Arc<UploadPipeline> {
        Arc::new(UploadPipeline::new(
            store,
            Arc::new(SourceRegistry::new()),
            Arc::new(MockPublishClient::new()),
            RemoteConfig::default(),
            PipelineConfig::default(),
        ))
    }

    fn keyed_store(path: &std::path::Path, key: &str) -> SqliteUploadStore {
        SqliteUploadStore::new(path)
            .unwrap()
            .with_cipher(CredentialCipher::from_base64(key).unwrap())
    }

    #[tokio::test]
    async fn test_workers_drain_both_lanes() {
        let store = Arc::new(SqliteUploadStore::in_memory().unwrap());
        let source = Arc::new(MockSourceHandler::new());
        let publisher = Arc::new(MockPublishClient::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let temp = tempfile::tempdir().unwrap();

        let pipeline = Arc::new(UploadPipeline::new(
            store.clone(),
            Arc::new(SourceRegistry::new().with_handler(source.clone())),
            publisher.clone(),
            RemoteConfig::default(),
            PipelineConfig {
                temp_dir: Some(temp.path().to_path_buf()),
            },
        ));

        let batch = store.create_batch("alice", "0123456789ab").unwrap();
        let mut items = Vec::new();
        for key in ["1", "2"] {
            source
                .add_item(fixtures::media_item(key), fixtures::content(64))
                .await;
            items.push(fixtures::upload_item(key).with_credential(Some("token".to_string())));
        }
        let requests = store.create_requests(batch.id, "alice", &items).unwrap();

        for (request, lane) in requests.iter().zip(Lane::ALL) {
            let handle = format!("h-{}", request.id);
            store.attach_task_handle(request.id, &handle).unwrap();
            queue
                .enqueue(DispatchTask {
                    handle,
                    request_id: request.id,
                    edit_group_id: batch.edit_group_id.clone(),
                    not_before: Utc::now(),
                    lane,
                })
                .await
                .unwrap();
        }

        let workers = UploadWorkers::new(
            WorkerConfig {
                enabled: true,
                privileged: 1,
                normal: 1,
            },
            queue.clone(),
            pipeline,
        );
        workers.start().await;
        assert!(workers.status().await.running);

        let settled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.batch_stats(batch.id).unwrap().is_settled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(settled.is_ok());

        for request in store.list_requests(batch.id).unwrap() {
            assert_eq!(request.status, UploadStatus::Completed);
        }

        workers.stop().await;
        let status = workers.status().await;
        assert!(!status.running);
        assert_eq!(status.queued_privileged, 0);
        assert_eq!(status.queued_normal, 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_harmless() {
        let store = Arc::new(SqliteUploadStore::in_memory().unwrap());
        let workers = UploadWorkers::new(
            WorkerConfig::default(),
            Arc::new(InMemoryTaskQueue::new()),
            idle_pipeline(store),
        );

        workers.start().await;
        workers.start().await;
        assert!(workers.status().await.running);
        workers.stop().await;
        workers.stop().await;
        assert!(!workers.status().await.running);
    }

    #[tokio::test]
    async fn test_task_taken_after_shutdown_goes_back_to_queue() {
        let store = Arc::new(SqliteUploadStore::in_memory().unwrap());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let batch = store.create_batch("alice", "0123456789ab").unwrap();
        let requests = store
            .create_requests(batch.id, "alice", &[fixtures::upload_item("1")])
            .unwrap();
        store.attach_task_handle(requests[0].id, "h-1").unwrap();
        queue
            .enqueue(DispatchTask {
                handle: "h-1".to_string(),
                request_id: requests[0].id,
                edit_group_id: batch.edit_group_id.clone(),
                not_before: Utc::now() + chrono::Duration::milliseconds(200),
                lane: Lane::Normal,
            })
            .await
            .unwrap();

        let workers = UploadWorkers::new(
            WorkerConfig {
                enabled: true,
                privileged: 0,
                normal: 1,
            },
            queue.clone(),
            idle_pipeline(store.clone()),
        );
        workers.start().await;
        // Shutdown is observed by the worker only once the task falls due
        workers.running.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(queue.len(Lane::Normal).await, 1);
        assert!(queue.contains("h-1").await);
        let row = store.get_request(requests[0].id).unwrap().unwrap();
        assert_eq!(row.status, UploadStatus::Queued);
        assert_eq!(row.task_handle.as_deref(), Some("h-1"));
    }

    #[tokio::test]
    async fn test_restart_recovers_interrupted_and_orphaned_requests() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("curator.db");
        let key = CredentialCipher::generate_key();

        // State left behind by a process that died mid-run
        let (batch, requests) = {
            let store = keyed_store(&db_path, &key);
            let batch = store.create_batch("alice", "0123456789ab").unwrap();
            let items: Vec<_> = ["1", "2", "3"]
                .iter()
                .map(|k| fixtures::upload_item(k).with_credential(Some("token".to_string())))
                .collect();
            let requests = store.create_requests(batch.id, "alice", &items).unwrap();
            store.attach_task_handle(requests[0].id, "old-0").unwrap();
            store.begin_processing(requests[0].id, "old-0").unwrap();
            store.attach_task_handle(requests[1].id, "old-1").unwrap();
            (batch, requests)
        };

        let store = Arc::new(keyed_store(&db_path, &key));
        let queue = Arc::new(InMemoryTaskQueue::new());
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(InMemorySlotStore::new()),
            Arc::new(MockPublishClient::new()),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(store.clone(), limiter, queue.clone()));
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let workers = UploadWorkers::new(
            WorkerConfig {
                enabled: true,
                privileged: 0,
                normal: 0,
            },
            queue.clone(),
            idle_pipeline(store.clone()),
        )
        .with_recovery(store.clone(), dispatcher)
        .with_update_callback(Arc::new(move |update| sink.lock().unwrap().push(update)));

        let report = workers.recover().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                interrupted: 1,
                requeued: 2,
            }
        );

        let interrupted = store.get_request(requests[0].id).unwrap().unwrap();
        assert_eq!(interrupted.status, UploadStatus::Failed);
        assert_eq!(
            interrupted.error.as_ref().map(|e| e.message()),
            Some(INTERRUPTED_MESSAGE)
        );
        assert!(interrupted.task_handle.is_none());
        assert!(interrupted.credential.is_none());

        for request in &requests[1..] {
            let row = store.get_request(request.id).unwrap().unwrap();
            assert_eq!(row.status, UploadStatus::Queued);
            let handle = row.task_handle.unwrap();
            assert_ne!(handle, "old-1");
            assert!(queue.contains(&handle).await);
        }
        assert_eq!(store.batch_stats(batch.id).unwrap().queued, 2);

        let updates = updates.lock().unwrap().clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].request_id, requests[0].id);
        assert_eq!(updates[0].status, UploadStatus::Failed);

        // Nothing left to recover
        assert_eq!(workers.recover().await.unwrap(), RecoveryReport::default());
    }
}
