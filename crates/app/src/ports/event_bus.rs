//! Event publisher port — where the router hands device change events.

use std::future::Future;

use synhome_domain::error::SynHomeError;
use synhome_domain::event::DeviceEvent;

/// Sink for the change events the router emits after each apply.
///
/// A failed publish is logged by the router; the device change stands.
pub trait EventPublisher {
    fn publish(&self, event: DeviceEvent)
    -> impl Future<Output = Result<(), SynHomeError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(
        &self,
        event: DeviceEvent,
    ) -> impl Future<Output = Result<(), SynHomeError>> + Send {
        (**self).publish(event)
    }
}
