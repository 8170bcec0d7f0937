//! Two-lane task dispatch for upload requests.

mod dispatcher;
mod queue;
mod types;

pub use dispatcher::{new_edit_group_id, TaskDispatcher};
pub use queue::{InMemoryTaskQueue, TaskQueue};
pub use types::{DispatchError, DispatchTask, Lane, QueueError};
