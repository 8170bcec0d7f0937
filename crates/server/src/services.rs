//! Core components wired together from configuration.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use curator_core::{
    Config, GatewayContext, InMemorySlotStore, InMemoryTaskQueue, PublishClient, RateLimiter,
    RetryCancelManager, SlotBackend, SlotStore, SourceRegistry, SqliteSlotStore, TaskDispatcher,
    UpdateHub, UploadPipeline, UploadStore, UploadWorkers,
};

pub struct Services {
    pub gateway: GatewayContext,
    pub hub: UpdateHub,
    pub workers: Arc<UploadWorkers>,
}

impl Services {
    /// Build dispatcher, pipeline, workers and manager around the given
    /// store and external clients. Workers are created stopped.
    pub fn build(
        config: &Config,
        store: Arc<dyn UploadStore>,
        sources: Arc<SourceRegistry>,
        publisher: Arc<dyn PublishClient>,
    ) -> Result<Self> {
        let slots: Arc<dyn SlotStore> = match config.rate_limit.backend {
            SlotBackend::Memory => Arc::new(InMemorySlotStore::new()),
            SlotBackend::Sqlite => {
                let path = config
                    .rate_limit
                    .path
                    .clone()
                    .unwrap_or_else(|| config.database.path.clone());
                info!("Using shared slot store at {:?}", path);
                Arc::new(
                    SqliteSlotStore::new(&path)
                        .with_context(|| format!("Failed to open slot store at {:?}", path))?,
                )
            }
        };

        let hub = UpdateHub::new(config.gateway.broadcast_capacity);
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            slots,
            Arc::clone(&publisher),
        ));
        let queue = Arc::new(InMemoryTaskQueue::new());
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::clone(&store),
            limiter,
            queue.clone(),
        ));

        let pipeline = Arc::new(
            UploadPipeline::new(
                Arc::clone(&store),
                Arc::clone(&sources),
                publisher,
                config.remote.clone(),
                config.pipeline.clone(),
            )
            .with_update_callback(hub.callback()),
        );
        let workers = Arc::new(
            UploadWorkers::new(config.workers.clone(), queue, pipeline)
                .with_recovery(Arc::clone(&store), Arc::clone(&dispatcher))
                .with_update_callback(hub.callback()),
        );

        let manager = Arc::new(
            RetryCancelManager::new(Arc::clone(&store), Arc::clone(&dispatcher))
                .with_update_callback(hub.callback()),
        );

        let gateway = GatewayContext {
            store,
            sources,
            dispatcher,
            manager,
            config: config.gateway.clone(),
        };

        Ok(Self {
            gateway,
            hub,
            workers,
        })
    }
}
