use crate::protocol::{encode_line, Outbound};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

pub const DEFAULT_BROADCAST_BUFFER_SIZE: usize = 1024;

pub type Subscription = broadcast::Receiver<Arc<str>>;

/// Fan-out of serialized lines to every current subscriber.
///
/// Subscribers only observe lines published after they subscribed; there is
/// no backlog replay.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Arc<str>>,
}

impl BroadcastHub {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> Subscription {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes one message. Returns the number of subscribers it was handed
    /// to; zero subscribers is a no-op.
    pub fn publish(&self, message: &Outbound) -> usize {
        if self.subscriber_count() == 0 {
            return 0;
        }

        let line = match encode_line(message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize outbound message: {}", e);
                return 0;
            }
        };

        // Only fails when every receiver dropped since the check above
        self.sender.send(Arc::from(line)).unwrap_or(0)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_BUFFER_SIZE)
    }
}
