use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Priority lane of the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Privileged,
    Normal,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Privileged, Lane::Normal];

    /// Queue name of the lane.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Lane::Privileged => "uploads-privileged",
            Lane::Normal => "uploads-normal",
        }
    }

    pub fn for_class(privileged: bool) -> Self {
        if privileged {
            Lane::Privileged
        } else {
            Lane::Normal
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

/// A queued unit of work: run the pipeline for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTask {
    /// Opaque handle, also recorded on the request row.
    pub handle: String,
    pub request_id: i64,
    pub edit_group_id: String,
    /// Earliest time a worker may start the task.
    pub not_before: DateTime<Utc>,
    pub lane: Lane,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Upload request {0} is already dispatched")]
    AlreadyDispatched(i64),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
