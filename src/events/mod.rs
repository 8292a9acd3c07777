use crate::uploader::task::{TaskId, TaskSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing;

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// Events delivered to subscribers of one upload task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Status or progress changed
    Snapshot(TaskSnapshot),
    /// Fingerprinting progress
    HashProgress { task_id: TaskId, percent: u8 },
    /// Message meant for the user
    Notice {
        task_id: TaskId,
        level: NoticeLevel,
        message: String,
    },
}

/// Per-task event publisher
///
/// Every event goes out on a broadcast channel. The latest snapshot is also
/// kept in a watch channel so late subscribers can read the current state.
#[derive(Clone)]
pub struct TaskEventPublisher {
    task_id: TaskId,
    sender: Arc<broadcast::Sender<TaskEvent>>,
    latest: Arc<watch::Sender<TaskSnapshot>>,
}

impl TaskEventPublisher {
    /// Create a publisher
    ///
    /// # Arguments
    /// * `capacity` - Buffer size of the broadcast channel
    /// * `initial` - Snapshot returned before anything is published
    pub fn new(capacity: usize, initial: TaskSnapshot) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (latest, _) = watch::channel(initial.clone());
        Self {
            task_id: initial.task_id,
            sender: Arc::new(sender),
            latest: Arc::new(latest),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Receiver that always holds the latest snapshot
    pub fn watch(&self) -> watch::Receiver<TaskSnapshot> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> TaskSnapshot {
        self.latest.borrow().clone()
    }

    /// Broadcast an event to all subscribers
    ///
    /// # Returns
    /// The number of receivers that received the event
    pub fn broadcast(&self, event: TaskEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                tracing::trace!(target: "events", task_id = %self.task_id, subscribers = count, "Broadcast event");
                count
            }
            Err(_) => {
                tracing::trace!(target: "events", task_id = %self.task_id, "No active subscribers");
                0
            }
        }
    }

    /// Helper: publish a snapshot
    pub fn snapshot(&self, snapshot: TaskSnapshot) {
        self.latest.send_replace(snapshot.clone());
        self.broadcast(TaskEvent::Snapshot(snapshot));
    }

    /// Helper: publish hashing progress
    pub fn hash_progress(&self, percent: u8) {
        self.broadcast(TaskEvent::HashProgress {
            task_id: self.task_id,
            percent,
        });
    }

    /// Helper: publish a notice
    pub fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "events", task_id = %self.task_id, ?level, message = %message, "Notice");
        self.broadcast(TaskEvent::Notice {
            task_id: self.task_id,
            level,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::task::UploadTask;

    fn initial() -> TaskSnapshot {
        UploadTask::new(TaskId::new(), "a.bin", 10, 4).unwrap().snapshot()
    }

    #[tokio::test]
    async fn test_snapshot_reaches_subscribers_and_watch() {
        let first = initial();
        let publisher = TaskEventPublisher::new(8, first.clone());
        let mut rx = publisher.subscribe();
        let watch = publisher.watch();

        let mut next = first.clone();
        next.percent = 40;
        publisher.snapshot(next.clone());

        match rx.recv().await.unwrap() {
            TaskEvent::Snapshot(s) => assert_eq!(s.percent, 40),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(watch.borrow().percent, 40);
        assert_eq!(publisher.latest(), next);
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let publisher = TaskEventPublisher::new(8, initial());
        assert_eq!(publisher.broadcast(TaskEvent::HashProgress {
            task_id: TaskId::new(),
            percent: 1,
        }), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = TaskEvent::Notice {
            task_id: TaskId::new(),
            level: NoticeLevel::Success,
            message: "done".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Notice");
        assert_eq!(json["data"]["level"], "success");
        assert_eq!(json["data"]["message"], "done");
    }
}
