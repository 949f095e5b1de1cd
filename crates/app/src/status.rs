//! Status fan-out owned by an adapter.

use tokio::sync::{broadcast, watch};

use crate::ports::{StatusEvent, StatusStream, broadcast_status_stream};

/// Broadcasts inbound status to every open [`StatusStream`].
///
/// [`close`](Self::close) ends the streams handed out so far; streams
/// opened afterwards follow a fresh channel.
#[derive(Debug)]
pub struct StatusFeed {
    capacity: usize,
    sender: watch::Sender<broadcast::Sender<StatusEvent>>,
}

impl StatusFeed {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = watch::channel(broadcast::channel(capacity).0);
        Self { capacity, sender }
    }

    /// Deliver `event` to the open streams. Returns how many received it.
    pub fn publish(&self, event: StatusEvent) -> usize {
        self.sender.borrow().send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn stream(&self) -> StatusStream {
        broadcast_status_stream(self.sender.borrow().subscribe())
    }

    /// End every stream handed out so far.
    pub fn close(&self) {
        drop(self.sender.send_replace(broadcast::channel(self.capacity).0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn status(id: &str) -> StatusEvent {
        StatusEvent {
            external_device_id: id.to_string(),
            fields: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn should_deliver_to_open_streams() {
        let feed = StatusFeed::new(4);
        let mut stream = feed.stream();
        assert_eq!(feed.publish(status("wm-01")), 1);
        assert_eq!(stream.next().await.unwrap().external_device_id, "wm-01");
    }

    #[test]
    fn should_drop_events_without_streams() {
        let feed = StatusFeed::new(4);
        assert_eq!(feed.publish(status("wm-01")), 0);
    }

    #[tokio::test]
    async fn should_end_streams_on_close() {
        let feed = StatusFeed::new(4);
        let mut stream = feed.stream();
        feed.close();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn should_serve_new_streams_after_close() {
        let feed = StatusFeed::new(4);
        feed.close();
        let mut stream = feed.stream();
        feed.publish(status("rc-01"));
        assert_eq!(stream.next().await.unwrap().external_device_id, "rc-01");
    }
}
