//! Fan-out of status updates to every connected session.

use tokio::sync::broadcast;
use tracing::trace;

use crate::events::{StatusUpdate, UpdateCallback};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UpdateHub {
    tx: broadcast::Sender<StatusUpdate>,
}

impl UpdateHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an update. Updates sent while nobody listens are dropped.
    pub fn publish(&self, update: StatusUpdate) {
        if self.tx.send(update).is_err() {
            trace!("No sessions listening for status updates");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    /// Callback publishing into this hub, for the pipeline and the manager.
    pub fn callback(&self) -> UpdateCallback {
        let hub = self.clone();
        Arc::new(move |update| hub.publish(update))
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UploadStatus;

    fn update(request_id: i64) -> StatusUpdate {
        StatusUpdate {
            batch_id: 1,
            request_id,
            key: request_id.to_string(),
            status: UploadStatus::InProgress,
            error: None,
            success: None,
        }
    }

    #[tokio::test]
    async fn test_callback_reaches_all_receivers() {
        let hub = UpdateHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        assert_eq!(hub.listeners(), 2);

        (hub.callback())(update(5));

        assert_eq!(first.recv().await.unwrap().request_id, 5);
        assert_eq!(second.recv().await.unwrap().request_id, 5);
    }

    #[tokio::test]
    async fn test_slow_receiver_lags() {
        let hub = UpdateHub::new(2);
        let mut rx = hub.subscribe();
        for id in 0..5 {
            hub.publish(update(id));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_publish_without_listeners() {
        let hub = UpdateHub::new(2);
        hub.publish(update(1));
        assert_eq!(hub.listeners(), 0);
    }
}
