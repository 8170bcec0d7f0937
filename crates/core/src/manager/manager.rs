//! Retries of failed requests and cancellation of queued ones.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{CancelOutcome, ManagerError, RetryOutcome};
use crate::auth::Identity;
use crate::dispatcher::{new_edit_group_id, Lane, TaskDispatcher};
use crate::events::{StatusUpdate, UpdateCallback};
use crate::metrics::{REQUESTS_CANCELLED, REQUESTS_RETRIED, REVOCATION_FAILURES};
use crate::store::{Batch, RetrySelection, UploadStatus, UploadStore};

pub struct RetryCancelManager {
    store: Arc<dyn UploadStore>,
    dispatcher: Arc<TaskDispatcher>,
    on_update: Option<UpdateCallback>,
}

impl RetryCancelManager {
    pub fn new(store: Arc<dyn UploadStore>, dispatcher: Arc<TaskDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            on_update: None,
        }
    }

    /// Set a callback invoked for every cancelled request.
    pub fn with_update_callback(mut self, callback: UpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    /// Copy every failed request of a batch into a new batch and dispatch it.
    pub async fn retry_failed(
        &self,
        batch_id: i64,
        identity: &Identity,
    ) -> Result<RetryOutcome, ManagerError> {
        self.owned_batch(batch_id, identity)?;

        let failed: Vec<i64> = self
            .store
            .list_requests(batch_id)?
            .into_iter()
            .filter(|r| r.status == UploadStatus::Failed)
            .map(|r| r.id)
            .collect();

        let selection = RetrySelection {
            request_ids: failed,
            owner: None,
            requested_by: identity.user_id.clone(),
            edit_group_id: new_edit_group_id(),
            credential: identity.credential.clone(),
        };
        let outcome = self.retry(&selection, None).await?;

        REQUESTS_RETRIED
            .with_label_values(&["batch"])
            .inc_by(outcome.retried as u64);
        info!(
            batch_id = batch_id,
            new_batch_id = ?outcome.new_batch_id,
            retried = outcome.retried,
            user = %identity.user_id,
            "Retried failed uploads of batch"
        );
        Ok(outcome)
    }

    /// Copy the failed requests among `request_ids` into a new batch.
    ///
    /// Ids that do not exist or are not failed are ignored. Non-admins may
    /// only retry their own requests; admin retries use the privileged lane.
    pub async fn retry_selected(
        &self,
        request_ids: &[i64],
        identity: &Identity,
    ) -> Result<RetryOutcome, ManagerError> {
        let requested = request_ids.len();
        if requested == 0 {
            return Ok(RetryOutcome::default());
        }

        let selection = RetrySelection {
            request_ids: request_ids.to_vec(),
            owner: (!identity.is_admin).then(|| identity.user_id.clone()),
            requested_by: identity.user_id.clone(),
            edit_group_id: new_edit_group_id(),
            credential: identity.credential.clone(),
        };
        let lane = identity.is_admin.then_some(Lane::Privileged);

        let mut outcome = self.retry(&selection, lane).await?;
        outcome.requested = requested;

        REQUESTS_RETRIED
            .with_label_values(&["selection"])
            .inc_by(outcome.retried as u64);
        info!(
            requested = requested,
            retried = outcome.retried,
            new_batch_id = ?outcome.new_batch_id,
            admin = identity.is_admin,
            user = %identity.user_id,
            "Retried selected uploads"
        );
        Ok(outcome)
    }

    async fn retry(
        &self,
        selection: &RetrySelection,
        lane: Option<Lane>,
    ) -> Result<RetryOutcome, ManagerError> {
        let requested = selection.request_ids.len();
        let Some(copy) = self.store.retry_into_new_batch(selection)? else {
            return Ok(RetryOutcome {
                new_batch_id: None,
                retried: 0,
                requested,
            });
        };

        let edit_group_id = &copy.batch.edit_group_id;
        match lane {
            Some(lane) => {
                self.dispatcher
                    .dispatch_on_lane(&copy.requests, edit_group_id, lane)
                    .await?
            }
            None => self.dispatcher.dispatch(&copy.requests, edit_group_id).await?,
        };

        Ok(RetryOutcome {
            new_batch_id: Some(copy.batch.id),
            retried: copy.requests.len(),
            requested,
        })
    }

    /// Cancel every request of a batch that has not started yet.
    ///
    /// Running requests are left alone. Revoking the queued tasks is best
    /// effort: a task that slips through finds its request cancelled and
    /// does nothing.
    pub async fn cancel_batch(
        &self,
        batch_id: i64,
        identity: &Identity,
    ) -> Result<CancelOutcome, ManagerError> {
        self.owned_batch(batch_id, identity)?;

        let cancelled = self.store.cancel_queued(batch_id)?;
        if cancelled.is_empty() {
            return Ok(CancelOutcome {
                batch_id,
                cancelled: 0,
                message: "No queued items to cancel".to_string(),
            });
        }

        let queue = self.dispatcher.queue();
        for request in &cancelled {
            let Some(ref handle) = request.task_handle else {
                continue;
            };
            match queue.revoke(handle).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(request_id = request.id, handle = %handle, "Task already left the queue");
                }
                Err(e) => {
                    REVOCATION_FAILURES.inc();
                    warn!(request_id = request.id, error = %e, "Failed to revoke task");
                }
            }
        }

        if let Some(ref callback) = self.on_update {
            for request in &cancelled {
                match self.store.get_request(request.id) {
                    Ok(Some(row)) => callback(StatusUpdate::from_request(&row)),
                    Ok(None) => {}
                    Err(e) => warn!(request_id = request.id, error = %e, "Failed to load cancelled request"),
                }
            }
        }

        REQUESTS_CANCELLED.inc_by(cancelled.len() as u64);
        info!(
            batch_id = batch_id,
            cancelled = cancelled.len(),
            user = %identity.user_id,
            "Cancelled queued uploads"
        );

        Ok(CancelOutcome {
            batch_id,
            cancelled: cancelled.len(),
            message: format!("Cancelled {} queued item(s)", cancelled.len()),
        })
    }

    fn owned_batch(&self, batch_id: i64, identity: &Identity) -> Result<Batch, ManagerError> {
        let batch = self
            .store
            .get_batch(batch_id)?
            .ok_or(ManagerError::NotFound(batch_id))?;
        if !identity.can_access(&batch.user_id) {
            return Err(ManagerError::PermissionDenied(format!(
                "batch {} belongs to another user",
                batch_id
            )));
        }
        Ok(batch)
    }
}
