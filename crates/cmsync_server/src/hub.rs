//! Change broadcast to subscribed clients.

use cmsync_protocol::ChangeMessage;
use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

/// Fans out change messages to every subscriber.
///
/// Each subscription is a forwarding task from a broadcast receiver into a
/// bounded mpsc stream. A subscriber that falls further behind than the
/// broadcast capacity is disconnected rather than silently skipped, so the
/// client reconnects and resynchronizes.
#[derive(Debug)]
pub struct ChangeHub {
    sender: RwLock<broadcast::Sender<ChangeMessage>>,
    capacity: usize,
    stream_buffer: usize,
}

impl ChangeHub {
    /// Creates a hub.
    pub fn new(capacity: usize, stream_buffer: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: RwLock::new(sender),
            capacity,
            stream_buffer: stream_buffer.max(1),
        }
    }

    /// Sends `message` to every subscriber. Returns how many were live.
    pub fn publish(&self, message: ChangeMessage) -> usize {
        self.sender.read().send(message).unwrap_or(0)
    }

    /// Opens a subscription stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) -> mpsc::Receiver<ChangeMessage> {
        let mut inbound = self.sender.read().subscribe();
        let (tx, rx) = mpsc::channel(self.stream_buffer);

        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged, disconnecting");
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        rx
    }

    /// Ends every live subscription.
    pub fn disconnect_all(&self) {
        let (fresh, _) = broadcast::channel(self.capacity);
        let previous = std::mem::replace(&mut *self.sender.write(), fresh);
        tracing::debug!(subscribers = previous.receiver_count(), "disconnecting subscribers");
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.read().receiver_count()
    }
}
