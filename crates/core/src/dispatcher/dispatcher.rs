//! Classification, slot reservation and enqueueing of upload requests.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::TaskQueue;
use super::types::{DispatchError, DispatchTask, Lane};
use crate::metrics::{DISPATCHED_TASKS, SLOT_DELAY};
use crate::rate_limiter::RateLimiter;
use crate::store::{StoreError, UploadRequest, UploadStore};

/// New edit group id: 12 lowercase hex characters.
pub fn new_edit_group_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub struct TaskDispatcher {
    store: Arc<dyn UploadStore>,
    limiter: Arc<RateLimiter>,
    queue: Arc<dyn TaskQueue>,
}

impl TaskDispatcher {
    pub fn new(
        store: Arc<dyn UploadStore>,
        limiter: Arc<RateLimiter>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            store,
            limiter,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Enqueue every request on the lane of its owner's rate class.
    ///
    /// Fails without enqueuing anything if any request already carries a
    /// task handle. Returns the number of tasks enqueued.
    pub async fn dispatch(
        &self,
        requests: &[UploadRequest],
        edit_group_id: &str,
    ) -> Result<usize, DispatchError> {
        self.dispatch_inner(requests, edit_group_id, None).await
    }

    /// Enqueue every request on `lane` regardless of its owner's class.
    pub async fn dispatch_on_lane(
        &self,
        requests: &[UploadRequest],
        edit_group_id: &str,
        lane: Lane,
    ) -> Result<usize, DispatchError> {
        self.dispatch_inner(requests, edit_group_id, Some(lane)).await
    }

    async fn dispatch_inner(
        &self,
        requests: &[UploadRequest],
        edit_group_id: &str,
        forced_lane: Option<Lane>,
    ) -> Result<usize, DispatchError> {
        for request in requests {
            let current = self
                .store
                .get_request(request.id)?
                .ok_or_else(|| StoreError::NotFound(format!("upload request {}", request.id)))?;
            if current.task_handle.is_some() {
                return Err(DispatchError::AlreadyDispatched(request.id));
            }
        }

        let mut lanes: HashMap<&str, Lane> = HashMap::new();
        let mut dispatched = 0;

        for request in requests {
            let lane = match forced_lane {
                Some(lane) => lane,
                None => match lanes.get(request.user_id.as_str()) {
                    Some(lane) => *lane,
                    None => {
                        let class = self
                            .limiter
                            .classify(&request.user_id, request.credential.as_deref())
                            .await;
                        let lane = Lane::for_class(class.privileged);
                        lanes.insert(&request.user_id, lane);
                        lane
                    }
                },
            };

            let not_before = self
                .limiter
                .reserve_slot(&request.user_id, lane == Lane::Privileged)
                .await;
            let handle = Uuid::new_v4().to_string();

            match self.store.attach_task_handle(request.id, &handle) {
                Ok(()) => {}
                Err(e @ (StoreError::AlreadyDispatched(_) | StoreError::InvalidState { .. })) => {
                    warn!(request_id = request.id, error = %e, "Request changed before dispatch, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let task = DispatchTask {
                handle: handle.clone(),
                request_id: request.id,
                edit_group_id: edit_group_id.to_string(),
                not_before,
                lane,
            };

            if let Err(e) = self.queue.enqueue(task).await {
                error!(request_id = request.id, error = %e, "Enqueue failed, detaching handle");
                if let Err(detach_err) = self.store.detach_task_handle(request.id, &handle) {
                    error!(request_id = request.id, error = %detach_err, "Failed to detach handle");
                }
                return Err(e.into());
            }

            let delay = (not_before - Utc::now()).num_milliseconds().max(0) as f64 / 1000.0;
            DISPATCHED_TASKS.with_label_values(&[lane.queue_name()]).inc();
            SLOT_DELAY
                .with_label_values(&[lane.queue_name()])
                .observe(delay);
            debug!(
                request_id = request.id,
                lane = %lane,
                not_before = %not_before,
                "Task enqueued"
            );
            dispatched += 1;
        }

        info!(
            dispatched,
            requested = requests.len(),
            edit_group = %edit_group_id,
            "Dispatch finished"
        );
        Ok(dispatched)
    }
}
