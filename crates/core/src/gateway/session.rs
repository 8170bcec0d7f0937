//! Per-connection protocol state machine.
//!
//! A session is driven by a single loop owned by the transport: client
//! messages are handled to completion one at a time, and status updates are
//! fed in between. Replies are returned rather than sent so the transport
//! decides how to write them, which keeps every ack ahead of later pushes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::GatewayConfig;
use super::error::GatewayError;
use super::messages::{ClientMessage, ServerMessage, SliceAckItem, SliceItem, SliceItemStatus};
use crate::auth::Identity;
use crate::dispatcher::{new_edit_group_id, TaskDispatcher};
use crate::events::StatusUpdate;
use crate::manager::RetryCancelManager;
use crate::source::{SourceError, SourceHandler, SourceKind, SourceRegistry};
use crate::store::{Batch, BatchFilter, BatchSummary, PresetDraft, UploadStore};

/// Default and maximum page size of `fetch_batches`.
const MAX_BATCH_PAGE: i64 = 100;

/// Items per `partial_collection_images` message when a collection is
/// listed in batches.
const BATCH_RETRIEVAL_SIZE: usize = 100;

/// Where a connection is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    /// A batch was created and is being filled with slices.
    Creating { batch_id: i64 },
    /// At least one batch subscription is active.
    Subscribed,
}

/// Shared services used by every session.
#[derive(Clone)]
pub struct GatewayContext {
    pub store: Arc<dyn UploadStore>,
    pub sources: Arc<SourceRegistry>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub manager: Arc<RetryCancelManager>,
    pub config: GatewayConfig,
}

pub struct GatewaySession {
    ctx: GatewayContext,
    identity: Identity,
    phase: ConnectionPhase,
    subscriptions: BTreeSet<i64>,
    /// Page size of the first `fetch_batches` page kept up to date, if any.
    batches_list: Option<i64>,
    /// Batch id to whether this user owns it. Ownership never changes.
    owned_batches: HashMap<i64, bool>,
}

impl GatewaySession {
    pub fn new(ctx: GatewayContext, identity: Identity) -> Self {
        Self {
            ctx,
            identity,
            phase: ConnectionPhase::Idle,
            subscriptions: BTreeSet::new(),
            batches_list: None,
            owned_batches: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Batches this connection is subscribed to.
    pub fn subscriptions(&self) -> Vec<i64> {
        self.subscriptions.iter().copied().collect()
    }

    /// Whether `batches_list` updates are being pushed.
    pub fn streams_batches_list(&self) -> bool {
        self.batches_list.is_some()
    }

    /// Handle one client message to completion and return the replies.
    pub async fn handle(&mut self, message: ClientMessage) -> Vec<ServerMessage> {
        let kind = message.kind();
        debug!(user = %self.identity.user_id, message = kind, "Handling message");

        match self.route(message).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(user = %self.identity.user_id, message = kind, error = %e, "Request failed");
                vec![ServerMessage::error(e.to_string())]
            }
        }
    }

    /// Forward a status update if this connection is subscribed to its
    /// batch, and refresh the streamed batches list when the batch is ours.
    pub fn on_update(&mut self, update: StatusUpdate) -> Vec<ServerMessage> {
        let batch_id = update.batch_id;
        let mut replies = Vec::new();

        if self.subscriptions.contains(&batch_id) {
            let terminal = update.status.is_terminal();
            replies.push(ServerMessage::UploadsUpdate {
                batch_id,
                items: vec![update],
            });
            if terminal {
                replies.extend(self.complete_if_settled(batch_id));
            }
        }

        if self.batches_list.is_some() && self.owns_batch(batch_id) {
            replies.extend(self.batches_list_change(batch_id));
        }
        replies
    }

    /// Fresh snapshot of every subscribed batch and of the streamed batches
    /// list, used after missed updates.
    pub fn resync(&mut self) -> Vec<ServerMessage> {
        let mut replies = Vec::new();
        for batch_id in self.subscriptions() {
            match self.snapshot(batch_id) {
                Ok(messages) => replies.extend(messages),
                Err(e) => {
                    warn!(batch_id = batch_id, error = %e, "Failed to resync batch");
                }
            }
        }
        if let Some(limit) = self.batches_list {
            match self.batches_page(limit, 0) {
                Ok(message) => replies.push(message),
                Err(e) => warn!(error = %e, "Failed to resync batches list"),
            }
        }
        replies
    }

    async fn route(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>, GatewayError> {
        match message {
            ClientMessage::CreateBatch => self.create_batch(),
            ClientMessage::UploadSlice {
                batch_id,
                slice_id,
                handler,
                items,
            } => self.upload_slice(batch_id, slice_id, handler, items).await,
            ClientMessage::SubscribeBatch { batch_id } => self.subscribe(batch_id),
            ClientMessage::UnsubscribeBatch { batch_id } => Ok(self.unsubscribe(batch_id)),
            ClientMessage::RetryUploads { batch_id } => self.retry_uploads(batch_id).await,
            ClientMessage::CancelBatch { batch_id } => self.cancel_batch(batch_id).await,
            ClientMessage::FetchBatches { limit, offset } => self.fetch_batches(limit, offset),
            ClientMessage::UnsubscribeBatchesList => {
                self.batches_list = None;
                Ok(Vec::new())
            }
            ClientMessage::FetchBatchUploads { batch_id } => self.fetch_batch_uploads(batch_id),
            ClientMessage::FetchImages {
                handler,
                collection,
            } => self.fetch_images(handler, collection).await,
            ClientMessage::SavePreset { preset_id, preset } => self.save_preset(preset_id, preset),
            ClientMessage::FetchPresets { handler } => self.presets_list(handler),
            ClientMessage::DeletePreset { preset_id } => self.delete_preset(preset_id),
        }
    }

    fn create_batch(&mut self) -> Result<Vec<ServerMessage>, GatewayError> {
        let batch = self
            .ctx
            .store
            .create_batch(&self.identity.user_id, &new_edit_group_id())?;
        self.phase = ConnectionPhase::Creating { batch_id: batch.id };
        self.owned_batches.insert(batch.id, true);

        info!(
            batch_id = batch.id,
            user = %self.identity.user_id,
            "Batch created"
        );
        let mut replies = vec![ServerMessage::BatchCreated {
            batch_id: batch.id,
            edit_group_id: batch.edit_group_id.clone(),
        }];
        if self.batches_list.is_some() {
            replies.extend(self.batches_list_change(batch.id));
        }
        Ok(replies)
    }

    async fn upload_slice(
        &mut self,
        batch_id: i64,
        slice_id: u64,
        handler: SourceKind,
        items: Vec<SliceItem>,
    ) -> Result<Vec<ServerMessage>, GatewayError> {
        let batch = self.batch(batch_id)?;
        if batch.user_id != self.identity.user_id {
            return Err(GatewayError::PermissionDenied);
        }
        let max = self.ctx.config.max_slice_items;
        if items.len() > max {
            return Err(GatewayError::SliceTooLarge {
                count: items.len(),
                max,
            });
        }
        self.ctx.sources.get(handler)?;

        let mut acks: Vec<SliceAckItem> = Vec::with_capacity(items.len());
        let mut accepted = Vec::new();
        let mut accepted_positions = Vec::new();
        let mut seen = HashSet::new();

        for item in items {
            let reason = if item.key.trim().is_empty() {
                Some("empty key")
            } else if item.title.trim().is_empty() {
                Some("empty title")
            } else if !seen.insert(item.key.clone()) {
                Some("duplicate key in slice")
            } else {
                None
            };

            match reason {
                Some(reason) => acks.push(SliceAckItem {
                    key: item.key,
                    status: SliceItemStatus::Rejected,
                    request_id: None,
                    reason: Some(reason.to_string()),
                }),
                None => {
                    acks.push(SliceAckItem {
                        key: item.key.clone(),
                        status: SliceItemStatus::Queued,
                        request_id: None,
                        reason: None,
                    });
                    accepted_positions.push(acks.len() - 1);
                    accepted.push(item.into_request(handler, self.identity.credential.clone()));
                }
            }
        }

        if !accepted.is_empty() {
            let created =
                self.ctx
                    .store
                    .create_requests(batch_id, &self.identity.user_id, &accepted)?;
            for (position, request) in accepted_positions.iter().zip(&created) {
                acks[*position].request_id = Some(request.id);
            }
            self.ctx
                .dispatcher
                .dispatch(&created, &batch.edit_group_id)
                .await?;
        }

        info!(
            batch_id = batch_id,
            slice_id = slice_id,
            queued = accepted_positions.len(),
            rejected = acks.len() - accepted_positions.len(),
            user = %self.identity.user_id,
            "Upload slice accepted"
        );
        Ok(vec![ServerMessage::UploadSliceAck {
            batch_id,
            slice_id,
            items: acks,
        }])
    }

    /// Owners and admins may watch a batch. Admin access is read-only:
    /// slices and cancels still require ownership or the manager's checks.
    fn subscribe(&mut self, batch_id: i64) -> Result<Vec<ServerMessage>, GatewayError> {
        let batch = self.batch(batch_id)?;
        if !self.identity.can_access(&batch.user_id) {
            return Err(GatewayError::PermissionDenied);
        }

        self.subscriptions.insert(batch_id);
        self.phase = ConnectionPhase::Subscribed;
        info!(batch_id = batch_id, user = %self.identity.user_id, "Subscribed to batch");

        let mut replies = vec![ServerMessage::Subscribed { batch_id }];
        replies.extend(self.snapshot(batch_id)?);
        Ok(replies)
    }

    fn unsubscribe(&mut self, batch_id: Option<i64>) -> Vec<ServerMessage> {
        match batch_id {
            Some(id) => {
                self.subscriptions.remove(&id);
            }
            None => self.subscriptions.clear(),
        }
        self.settle_phase();
        vec![ServerMessage::Unsubscribed { batch_id }]
    }

    async fn retry_uploads(&mut self, batch_id: i64) -> Result<Vec<ServerMessage>, GatewayError> {
        let outcome = self
            .ctx
            .manager
            .retry_failed(batch_id, &self.identity)
            .await?;
        match outcome.new_batch_id {
            Some(new_batch_id) => Ok(vec![ServerMessage::RetryStarted {
                batch_id,
                new_batch_id,
                retried: outcome.retried,
            }]),
            None => Err(GatewayError::Rejected(
                "No failed uploads to retry".to_string(),
            )),
        }
    }

    async fn cancel_batch(&mut self, batch_id: i64) -> Result<Vec<ServerMessage>, GatewayError> {
        let outcome = self
            .ctx
            .manager
            .cancel_batch(batch_id, &self.identity)
            .await?;
        Ok(vec![ServerMessage::BatchCancelled {
            batch_id,
            cancelled: outcome.cancelled,
            message: outcome.message,
        }])
    }

    /// List the caller's batches. The first page keeps streaming `partial`
    /// lists until `unsubscribe_batches_list` or a request for a later page.
    fn fetch_batches(
        &mut self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ServerMessage>, GatewayError> {
        let limit = limit.unwrap_or(MAX_BATCH_PAGE).clamp(1, MAX_BATCH_PAGE);
        let offset = offset.unwrap_or(0).max(0);

        let page = self.batches_page(limit, offset)?;
        self.batches_list = (offset == 0).then_some(limit);
        Ok(vec![page])
    }

    fn batches_page(&self, limit: i64, offset: i64) -> Result<ServerMessage, GatewayError> {
        let filter = BatchFilter::new()
            .with_user_id(self.identity.user_id.clone())
            .with_limit(limit)
            .with_offset(offset);

        let items = self.ctx.store.list_batches(&filter)?;
        let total = self.ctx.store.count_batches(&filter)?;
        Ok(ServerMessage::BatchesList {
            items,
            total,
            partial: false,
        })
    }

    /// `partial` list carrying the current summary of one changed batch.
    fn batches_list_change(&self, batch_id: i64) -> Option<ServerMessage> {
        match self.changed_batch(batch_id) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(batch_id = batch_id, error = %e, "Failed to refresh batches list");
                None
            }
        }
    }

    fn changed_batch(&self, batch_id: i64) -> Result<ServerMessage, GatewayError> {
        let batch = self.batch(batch_id)?;
        let stats = self.ctx.store.batch_stats(batch_id)?;
        let total = self
            .ctx
            .store
            .count_batches(&BatchFilter::new().with_user_id(self.identity.user_id.clone()))?;
        Ok(ServerMessage::BatchesList {
            items: vec![BatchSummary { batch, stats }],
            total,
            partial: true,
        })
    }

    fn owns_batch(&mut self, batch_id: i64) -> bool {
        if let Some(owned) = self.owned_batches.get(&batch_id) {
            return *owned;
        }
        match self.ctx.store.get_batch(batch_id) {
            Ok(Some(batch)) => {
                let owned = batch.user_id == self.identity.user_id;
                self.owned_batches.insert(batch_id, owned);
                owned
            }
            Ok(None) => false,
            Err(e) => {
                warn!(batch_id = batch_id, error = %e, "Failed to look up batch owner");
                false
            }
        }
    }

    fn fetch_batch_uploads(&self, batch_id: i64) -> Result<Vec<ServerMessage>, GatewayError> {
        let batch = self.batch(batch_id)?;
        let uploads = self.ctx.store.list_requests(batch_id)?;
        Ok(vec![ServerMessage::BatchUploadsList { batch, uploads }])
    }

    async fn fetch_images(
        &self,
        kind: SourceKind,
        collection: String,
    ) -> Result<Vec<ServerMessage>, GatewayError> {
        let handler = self.ctx.sources.get(kind)?;
        let items = match handler.fetch_collection(&collection).await {
            Ok(items) => items,
            Err(e) if e.is_listing_overload() => {
                warn!(
                    collection = %collection,
                    user = %self.identity.user_id,
                    error = %e,
                    "Collection listing failed, retrieving in batches"
                );
                return Ok(self.fetch_images_in_batches(handler.as_ref(), collection).await);
            }
            Err(e) => return Err(e.into()),
        };
        if items.is_empty() {
            return Err(GatewayError::Rejected("Collection not found".to_string()));
        }

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let mut existing: Vec<String> = handler.fetch_existing(&ids).await?.into_iter().collect();
        existing.sort();

        info!(
            collection = %collection,
            items = items.len(),
            existing = existing.len(),
            user = %self.identity.user_id,
            "Collection fetched"
        );
        Ok(vec![ServerMessage::CollectionImages {
            collection,
            items,
            existing,
        }])
    }

    /// List a collection by its ids, then in pages of items. Failures end
    /// the sequence with an error message after what was already listed.
    async fn fetch_images_in_batches(
        &self,
        handler: &dyn SourceHandler,
        collection: String,
    ) -> Vec<ServerMessage> {
        let mut replies = vec![ServerMessage::TryBatchRetrieval {
            message: "Large collection detected. Loading in batches...".to_string(),
        }];

        if let Err(e) = self
            .collection_in_batches(handler, &collection, &mut replies)
            .await
        {
            warn!(collection = %collection, error = %e, "Batch retrieval failed");
            replies.push(ServerMessage::error(format!("Batch retrieval failed: {}", e)));
        }
        replies
    }

    async fn collection_in_batches(
        &self,
        handler: &dyn SourceHandler,
        collection: &str,
        replies: &mut Vec<ServerMessage>,
    ) -> Result<(), SourceError> {
        let ids = handler.fetch_collection_ids(collection).await?;
        info!(
            collection = %collection,
            ids = ids.len(),
            user = %self.identity.user_id,
            "Collection ids fetched"
        );
        if ids.is_empty() {
            replies.push(ServerMessage::error("Collection has no images"));
            return Ok(());
        }

        replies.push(ServerMessage::CollectionImageIds {
            collection: collection.to_string(),
            ids: ids.clone(),
        });
        for chunk in ids.chunks(BATCH_RETRIEVAL_SIZE) {
            let items = handler.fetch_batch(collection, chunk).await?;
            let found: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            let mut existing: Vec<String> =
                handler.fetch_existing(&found).await?.into_iter().collect();
            existing.sort();

            replies.push(ServerMessage::PartialCollectionImages {
                collection: collection.to_string(),
                items,
                existing,
            });
        }
        Ok(())
    }

    fn save_preset(
        &self,
        preset_id: Option<i64>,
        draft: PresetDraft,
    ) -> Result<Vec<ServerMessage>, GatewayError> {
        let preset = self
            .ctx
            .store
            .save_preset(&self.identity.user_id, preset_id, &draft)?
            .ok_or_else(|| GatewayError::Rejected("Preset not found".to_string()))?;

        info!(
            preset_id = preset.id,
            handler = %preset.source,
            user = %self.identity.user_id,
            "Preset saved"
        );
        self.presets_list(preset.source)
    }

    fn presets_list(&self, handler: SourceKind) -> Result<Vec<ServerMessage>, GatewayError> {
        let presets = self
            .ctx
            .store
            .list_presets(&self.identity.user_id, handler)?;
        Ok(vec![ServerMessage::PresetsList { handler, presets }])
    }

    fn delete_preset(&self, preset_id: i64) -> Result<Vec<ServerMessage>, GatewayError> {
        let not_found = || GatewayError::Rejected("Preset not found".to_string());
        let preset = self
            .ctx
            .store
            .get_preset(preset_id)?
            .filter(|p| p.user_id == self.identity.user_id)
            .ok_or_else(not_found)?;

        if !self
            .ctx
            .store
            .delete_preset(preset_id, &self.identity.user_id)?
        {
            return Err(not_found());
        }
        info!(preset_id = preset_id, user = %self.identity.user_id, "Preset deleted");
        self.presets_list(preset.source)
    }

    fn batch(&self, batch_id: i64) -> Result<Batch, GatewayError> {
        self.ctx
            .store
            .get_batch(batch_id)?
            .ok_or(GatewayError::BatchNotFound(batch_id))
    }

    /// Current statuses of a batch, followed by completion if it is settled.
    fn snapshot(&mut self, batch_id: i64) -> Result<Vec<ServerMessage>, GatewayError> {
        let items = self
            .ctx
            .store
            .list_requests(batch_id)?
            .iter()
            .map(StatusUpdate::from_request)
            .collect();

        let mut replies = vec![ServerMessage::UploadsUpdate { batch_id, items }];
        replies.extend(self.complete_if_settled(batch_id));
        Ok(replies)
    }

    /// Send `uploads_complete` and drop the subscription once every request is terminal.
    fn complete_if_settled(&mut self, batch_id: i64) -> Option<ServerMessage> {
        let stats = match self.ctx.store.batch_stats(batch_id) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(batch_id = batch_id, error = %e, "Failed to read batch stats");
                return None;
            }
        };
        if stats.total == 0 || !stats.is_settled() {
            return None;
        }

        self.subscriptions.remove(&batch_id);
        self.settle_phase();
        info!(batch_id = batch_id, user = %self.identity.user_id, "Batch complete");
        Some(ServerMessage::UploadsComplete { batch_id })
    }

    fn settle_phase(&mut self) {
        if self.subscriptions.is_empty() && self.phase == ConnectionPhase::Subscribed {
            self.phase = ConnectionPhase::Idle;
        }
    }
}
