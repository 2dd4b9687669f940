//! Sync lifecycle status events.
//!
//! Events are broadcast best-effort: a slow subscriber that falls behind the
//! channel capacity loses the oldest events, and sending with no subscribers
//! is not an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use epgsync_common::{ErrorReason, InputId};

/// Lifecycle status of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// A session is about to begin.
    Started,
    /// A channel was processed.
    Scanned {
        channels_scanned: usize,
        channel_count: usize,
        display_name: String,
    },
    /// The session processed every channel.
    Finished,
    /// The session stopped early because it was cancelled.
    Cancelled,
    /// The session aborted.
    Error(ErrorReason),
}

impl SyncStatus {
    /// Whether no further status follows for this run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Finished | SyncStatus::Cancelled | SyncStatus::Error(_)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Started => write!(f, "STARTED"),
            SyncStatus::Scanned {
                channels_scanned,
                channel_count,
                display_name,
            } => write!(f, "SCANNED {}/{} ({})", channels_scanned, channel_count, display_name),
            SyncStatus::Finished => write!(f, "FINISHED"),
            SyncStatus::Cancelled => write!(f, "CANCELLED"),
            SyncStatus::Error(reason) => write!(f, "ERROR {:?}", reason),
        }
    }
}

/// A status tagged with the input it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusEvent {
    pub input_id: InputId,
    pub status: SyncStatus,
}

/// Sending half of the status broadcast.
#[derive(Debug, Clone)]
pub struct StatusSender {
    tx: broadcast::Sender<SyncStatusEvent>,
}

impl StatusSender {
    /// Create a broadcast channel holding up to `capacity` undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every event sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.tx.subscribe()
    }

    /// Broadcast a status for `input`.
    pub fn send(&self, input: &InputId, status: SyncStatus) {
        let event = SyncStatusEvent {
            input_id: input.clone(),
            status,
        };
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let sender = StatusSender::new(8);
        let mut first = sender.subscribe();
        let mut second = sender.subscribe();
        let input = InputId::new("input").unwrap();

        sender.send(&input, SyncStatus::Started);
        sender.send(&input, SyncStatus::Finished);

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap().status, SyncStatus::Started);
            let event = rx.recv().await.unwrap();
            assert_eq!(event.status, SyncStatus::Finished);
            assert_eq!(event.input_id, input);
        }
    }

    #[test]
    fn test_send_without_subscribers() {
        let sender = StatusSender::new(8);
        sender.send(&InputId::new("input").unwrap(), SyncStatus::Started);
        assert_eq!(sender.receiver_count(), 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SyncStatus::Finished.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(SyncStatus::Error(ErrorReason::NoChannels).is_terminal());
        assert!(!SyncStatus::Started.is_terminal());
    }
}
