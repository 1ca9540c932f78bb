use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// The signal that a snapshot is pending and a backup transfer should start.
///  The sender consults it on every idle turnaround; it must carry its own
///  synchronization.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PendingWork: Send + Sync + 'static {
    async fn is_empty(&self) -> bool;

    /// the front entry without removing it, or `None` if the queue is empty
    async fn peek_front(&self) -> Option<u64>;

    async fn dequeue(&self);
}

/// In-process pending-work queue shared between the key-value store and the
///  backup client.
#[derive(Default)]
pub struct BackupQueue {
    entries: Mutex<VecDeque<u64>>,
}

impl BackupQueue {
    pub fn new() -> BackupQueue {
        BackupQueue::default()
    }

    pub async fn enqueue(&self, entry: u64) {
        self.entries.lock().await.push_back(entry);
    }
}

#[async_trait]
impl PendingWork for BackupQueue {
    async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn peek_front(&self) -> Option<u64> {
        self.entries.lock().await.front().copied()
    }

    async fn dequeue(&self) {
        self.entries.lock().await.pop_front();
    }
}
