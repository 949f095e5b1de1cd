//! Fan-out of device change events to observers inside the daemon.

use std::future::Future;

use tokio::sync::broadcast;

use synhome_domain::error::SynHomeError;
use synhome_domain::event::DeviceEvent;

use crate::ports::EventPublisher;

/// Hands every [`DeviceEvent`] the router emits to each live receiver.
///
/// Events emitted while nobody listens are dropped. A receiver more than
/// `capacity` events behind skips ahead and sees `Lagged`.
pub struct InProcessEventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl InProcessEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receiver for change events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(
        &self,
        event: DeviceEvent,
    ) -> impl Future<Output = Result<(), SynHomeError>> + Send {
        if let Ok(receivers) = self.sender.send(event) {
            tracing::trace!(receivers, "device event fanned out");
        }
        async { Ok(()) }
    }
}
