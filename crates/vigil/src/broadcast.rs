use tokio::sync::broadcast;
use tracing::trace;

use crate::result::CheckResult;

/// Push delivery of new results to live subscribers.
///
/// Publishing is fire-and-forget: delivery is best effort and never fails
/// the caller.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, result: &CheckResult);
}

/// Broadcaster backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<CheckResult>,
}

impl ChannelBroadcaster {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// missing results
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckResult> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, result: &CheckResult) {
        // No receivers is not an error
        if self.tx.send(result.clone()).is_err() {
            trace!(check_id = %result.check_id, "No subscribers for result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_silent() {
        let broadcaster = ChannelBroadcaster::new(4);
        broadcaster.publish(&CheckResult::healthy("a", "ok"));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_results() {
        let broadcaster = ChannelBroadcaster::new(4);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        broadcaster.publish(&CheckResult::unhealthy("a", "down"));

        assert_eq!(first.recv().await.unwrap().check_id, "a");
        assert_eq!(second.recv().await.unwrap().message.as_deref(), Some("down"));
    }
}
