//! Background task feeding adapter status into the router.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::ports::{Adapter, EventPublisher};
use crate::router::CommandRouter;

/// Forward every status event from `adapter` to
/// [`CommandRouter::on_adapter_status`] until the adapter's stream ends.
///
/// Rejected telemetry is logged and skipped. The task ends when the adapter
/// disconnects.
pub fn spawn_status_ingestion<P>(
    router: Arc<CommandRouter<P>>,
    adapter: Arc<dyn Adapter>,
) -> JoinHandle<()>
where
    P: EventPublisher + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let adapter_id = adapter.id().to_string();
        let mut stream = adapter.status_stream();
        tracing::debug!(%adapter_id, "status ingestion started");

        while let Some(status) = stream.next().await {
            if let Err(err) = router
                .on_adapter_status(&adapter_id, &status.external_device_id, &status.fields)
                .await
            {
                tracing::warn!(
                    %adapter_id,
                    external_device_id = %status.external_device_id,
                    error = %err,
                    "status rejected"
                );
            }
        }
        tracing::debug!(%adapter_id, "status ingestion stopped");
    })
}
