//! Write outcome events
//!
//! Each settled write group is announced on a broadcast channel. Events are
//! sent from a detached task, so a slow or absent subscriber never delays
//! the write path and the write caller never awaits the side effect.

use quire_core::{PublisherAddress, TxHandle, WriteKind};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::SyncError;

/// Outcome of one write group
#[derive(Debug, Clone, PartialEq)]
pub enum WriteEvent {
    /// A group landed in one transaction
    Flushed {
        /// Accumulator that flushed, `None` for the immediate path
        kind: Option<WriteKind>,
        publisher: PublisherAddress,
        tx: TxHandle,
        records: usize,
    },
    /// A group failed; every caller in it received `error`
    Failed {
        kind: Option<WriteKind>,
        publisher: PublisherAddress,
        error: SyncError,
        records: usize,
    },
}

impl WriteEvent {
    pub fn publisher(&self) -> &PublisherAddress {
        match self {
            WriteEvent::Flushed { publisher, .. } | WriteEvent::Failed { publisher, .. } => {
                publisher
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WriteEvent::Failed { .. })
    }
}

/// Sending side of the write event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<WriteEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WriteEvent> {
        self.sender.subscribe()
    }

    /// Publish `event` from a detached task
    pub fn publish(&self, event: WriteEvent) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if sender.send(event).is_err() {
                trace!("No write event subscribers");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_published_events_reach_subscribers() {
        let sink = EventSink::new(8);
        let mut events = sink.subscribe();
        let publisher = PublisherAddress::from_bytes([0xaa; 20]);

        sink.publish(WriteEvent::Flushed {
            kind: Some(WriteKind::Like),
            publisher: publisher.clone(),
            tx: TxHandle::new("0x01"),
            records: 3,
        });

        let event = events.recv().await.unwrap();
        assert_eq!(event.publisher(), &publisher);
        assert!(!event.is_failure());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let sink = EventSink::new(1);
        sink.publish(WriteEvent::Failed {
            kind: None,
            publisher: PublisherAddress::from_bytes([0xbb; 20]),
            error: SyncError::QueueCleared,
            records: 1,
        });
        tokio::task::yield_now().await;
    }
}
