//! Intent extraction port — turns free text into a structured intent reply.

use async_trait::async_trait;

use synhome_domain::error::IntentParseError;
use synhome_domain::snapshot::DeviceSnapshot;

/// Interprets a raw user command against the current device list.
///
/// Implementations return the raw JSON reply; the router validates its
/// shape with [`Intent::from_reply`](synhome_domain::intent::Intent::from_reply).
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// # Errors
    ///
    /// Returns [`IntentParseError::Extractor`] when the collaborator itself
    /// fails.
    async fn extract(
        &self,
        raw_command: &str,
        devices: &[DeviceSnapshot],
    ) -> Result<serde_json::Value, IntentParseError>;
}
