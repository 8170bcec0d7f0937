//! Task queues with a not-before time per task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::types::{DispatchTask, Lane, QueueError};
use crate::metrics::QUEUED_TASKS;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError>;

    /// Revoke a task that has not been handed to a worker yet.
    ///
    /// Returns false when no such task is waiting.
    async fn revoke(&self, handle: &str) -> Result<bool, QueueError>;

    /// Wait for the next task of a lane whose not-before time has passed.
    async fn next(&self, lane: Lane) -> Result<DispatchTask, QueueError>;

    /// Tasks waiting in a lane, revoked ones excluded.
    async fn len(&self, lane: Lane) -> usize;

    /// Whether a task with this handle is still waiting to be handed out.
    async fn contains(&self, handle: &str) -> bool;
}

struct Entry {
    seq: u64,
    task: DispatchTask,
}

impl Entry {
    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.task.not_before, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Default)]
struct QueueState {
    lanes: HashMap<Lane, BinaryHeap<Reverse<Entry>>>,
    waiting: HashSet<String>,
    revoked: HashSet<String>,
}

enum Poll {
    Ready(DispatchTask),
    Wait(Option<std::time::Duration>),
}

/// In-process queue: one min-heap per lane ordered by not-before time.
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    notify: HashMap<Lane, Notify>,
    seq: AtomicU64,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Lane::ALL.iter().map(|lane| (*lane, Notify::new())).collect(),
            seq: AtomicU64::new(0),
        }
    }

    fn notifier(&self, lane: Lane) -> &Notify {
        // Every lane gets a notifier in new()
        &self.notify[&lane]
    }

    fn poll(&self, lane: Lane) -> Poll {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        loop {
            let QueueState {
                lanes,
                waiting,
                revoked,
            } = &mut *state;
            let Some(heap) = lanes.get_mut(&lane) else {
                return Poll::Wait(None);
            };
            let Some(Reverse(head)) = heap.peek() else {
                return Poll::Wait(None);
            };

            if revoked.contains(&head.task.handle) {
                if let Some(Reverse(entry)) = heap.pop() {
                    revoked.remove(&entry.task.handle);
                    QUEUED_TASKS.dec();
                    debug!(handle = %entry.task.handle, "Dropped revoked task");
                }
                continue;
            }

            if head.task.not_before > now {
                let wait = (head.task.not_before - now)
                    .to_std()
                    .unwrap_or_default();
                return Poll::Wait(Some(wait));
            }

            return match heap.pop() {
                Some(Reverse(entry)) => {
                    waiting.remove(&entry.task.handle);
                    QUEUED_TASKS.dec();
                    Poll::Ready(entry.task)
                }
                None => Poll::Wait(None),
            };
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), QueueError> {
        let lane = task.lane;
        {
            let mut state = self.state.lock().unwrap();
            state.waiting.insert(task.handle.clone());
            let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
            state
                .lanes
                .entry(lane)
                .or_default()
                .push(Reverse(Entry { seq, task }));
        }
        QUEUED_TASKS.inc();
        self.notifier(lane).notify_waiters();
        Ok(())
    }

    async fn revoke(&self, handle: &str) -> Result<bool, QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.waiting.remove(handle) {
            state.revoked.insert(handle.to_string());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn next(&self, lane: Lane) -> Result<DispatchTask, QueueError> {
        loop {
            let notified = self.notifier(lane).notified();
            tokio::pin!(notified);
            // Register before polling so an enqueue in between is not missed
            notified.as_mut().enable();

            match self.poll(lane) {
                Poll::Ready(task) => return Ok(task),
                Poll::Wait(Some(delay)) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Poll::Wait(None) => notified.await,
            }
        }
    }

    async fn len(&self, lane: Lane) -> usize {
        let state = self.state.lock().unwrap();
        state
            .lanes
            .get(&lane)
            .map(|heap| {
                heap.iter()
                    .filter(|Reverse(entry)| !state.revoked.contains(&entry.task.handle))
                    .count()
            })
            .unwrap_or(0)
    }

    async fn contains(&self, handle: &str) -> bool {
        self.state.lock().unwrap().waiting.contains(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn task(handle: &str, lane: Lane, not_before: DateTime<Utc>) -> DispatchTask {
        DispatchTask {
            handle: handle.to_string(),
            request_id: 1,
            edit_group_id: "0123456789ab".to_string(),
            not_before,
            lane,
        }
    }

    #[tokio::test]
    async fn test_orders_by_not_before() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now() - Duration::seconds(10);
        queue.enqueue(task("late", Lane::Normal, now + Duration::seconds(2))).await.unwrap();
        queue.enqueue(task("early", Lane::Normal, now)).await.unwrap();
        queue.enqueue(task("middle", Lane::Normal, now + Duration::seconds(1))).await.unwrap();

        assert_eq!(queue.next(Lane::Normal).await.unwrap().handle, "early");
        assert_eq!(queue.next(Lane::Normal).await.unwrap().handle, "middle");
        assert_eq!(queue.next(Lane::Normal).await.unwrap().handle, "late");
    }

    #[tokio::test]
    async fn test_lanes_are_independent() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        queue.enqueue(task("n", Lane::Normal, now)).await.unwrap();
        queue.enqueue(task("p", Lane::Privileged, now)).await.unwrap();

        assert_eq!(queue.len(Lane::Privileged).await, 1);
        assert_eq!(queue.next(Lane::Privileged).await.unwrap().handle, "p");
        assert_eq!(queue.len(Lane::Privileged).await, 0);
        assert_eq!(queue.len(Lane::Normal).await, 1);
    }

    #[tokio::test]
    async fn test_waits_for_not_before() {
        let queue = InMemoryTaskQueue::new();
        let start = std::time::Instant::now();
        queue
            .enqueue(task("soon", Lane::Normal, Utc::now() + Duration::milliseconds(150)))
            .await
            .unwrap();

        let next = queue.next(Lane::Normal).await.unwrap();
        assert_eq!(next.handle, "soon");
        assert!(start.elapsed() >= std::time::Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_revoked_task_is_skipped() {
        let queue = InMemoryTaskQueue::new();
        let now = Utc::now();
        queue.enqueue(task("a", Lane::Normal, now)).await.unwrap();
        queue.enqueue(task("b", Lane::Normal, now)).await.unwrap();

        assert!(queue.revoke("a").await.unwrap());
        assert!(!queue.revoke("a").await.unwrap());
        assert!(!queue.revoke("unknown").await.unwrap());
        assert_eq!(queue.len(Lane::Normal).await, 1);

        assert_eq!(queue.next(Lane::Normal).await.unwrap().handle, "b");
    }

    #[tokio::test]
    async fn test_taken_task_cannot_be_revoked() {
        let queue = InMemoryTaskQueue::new();
        queue.enqueue(task("a", Lane::Normal, Utc::now())).await.unwrap();
        queue.next(Lane::Normal).await.unwrap();
        assert!(!queue.revoke("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_contains_only_waiting_tasks() {
        let queue = InMemoryTaskQueue::new();
        queue.enqueue(task("a", Lane::Normal, Utc::now())).await.unwrap();
        queue.enqueue(task("b", Lane::Normal, Utc::now())).await.unwrap();
        assert!(queue.contains("a").await);
        assert!(!queue.contains("missing").await);

        queue.revoke("b").await.unwrap();
        assert!(!queue.contains("b").await);

        queue.next(Lane::Normal).await.unwrap();
        assert!(!queue.contains("a").await);
    }

    #[tokio::test]
    async fn test_waiting_worker_is_woken_by_enqueue() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next(Lane::Privileged).await.unwrap() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue
            .enqueue(task("wake", Lane::Privileged, Utc::now()))
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_secs(2), worker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.handle, "wake");
    }
}
