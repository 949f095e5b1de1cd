//! Error types shared across the workspace.
//!
//! Every layer defines its own typed errors and converts into
//! [`SynHomeError`] via `#[from]`. Adapter crates wrap their transport
//! errors in [`ConnectionError`] / [`DiscoveryError`] through a boxed
//! `#[source]` so the domain never depends on IO crates.

use std::time::Duration;

use crate::capability::Constraint;
use crate::value::CapabilityValue;

/// Boxed error used as `#[source]` for errors raised outside the domain.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error for every fallible synhome operation.
#[derive(Debug, thiserror::Error)]
pub enum SynHomeError {
    #[error(transparent)]
    InvalidValue(#[from] InvalidValueError),

    #[error(transparent)]
    UnknownCapability(#[from] UnknownCapabilityError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    IntentParse(#[from] IntentParseError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// A value falls outside the constraint of the capability it targets.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid value {attempted} for capability {capability}: expected {constraint}")]
pub struct InvalidValueError {
    pub capability: String,
    pub attempted: CapabilityValue,
    pub constraint: Constraint,
}

/// A command names a capability the device does not expose.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device {device_id} has no capability {capability}")]
pub struct UnknownCapabilityError {
    pub device_id: String,
    pub capability: String,
}

/// A lookup did not find the requested item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    /// Kind of item looked up (e.g. `"device"`, `"scene"`).
    pub entity: &'static str,
    pub id: String,
}

/// An adapter could not reach or lost its remote endpoint.
#[derive(Debug, thiserror::Error)]
#[error("adapter {adapter_id} connection failed")]
pub struct ConnectionError {
    pub adapter_id: String,
    #[source]
    pub source: BoxError,
}

/// The remote endpoint rejected the adapter's credentials.
///
/// Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("adapter {adapter_id} authentication failed: {reason}")]
pub struct AuthenticationError {
    pub adapter_id: String,
    pub reason: String,
}

/// Device discovery did not complete.
#[derive(Debug, thiserror::Error)]
#[error("adapter {adapter_id} discovery failed")]
pub struct DiscoveryError {
    pub adapter_id: String,
    #[source]
    pub source: BoxError,
}

/// Dispatching a command to a physical device failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No acknowledgement before the deadline.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The adapter or remote endpoint refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// The adapter holds no live session.
    #[error("adapter not connected")]
    NotConnected,
}

/// The intent extractor produced an unusable reply.
#[derive(Debug, thiserror::Error)]
pub enum IntentParseError {
    /// No extractor is configured for free-text commands.
    #[error("no intent extractor configured")]
    Unavailable,

    /// The extractor declined to produce an intent.
    #[error("intent rejected: {0}")]
    Rejected(String),

    /// The reply does not match the expected shape.
    #[error("malformed intent: {0}")]
    Malformed(String),

    /// The extractor itself failed.
    #[error("intent extractor failed")]
    Extractor(#[source] BoxError),
}

/// A device, binding, group or scene definition violates an invariant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("duplicate {entity} id {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("switch capability {capability} must declare exactly 2 states, got {count}")]
    SwitchStates { capability: String, count: usize },

    #[error("enum capability {capability} must declare at least one value")]
    EmptyEnum { capability: String },

    #[error("number capability {capability} has min {min} greater than max {max}")]
    InvertedRange { capability: String, min: f64, max: f64 },

    #[error("number capability {capability} has a non-finite bound")]
    NonFiniteBound { capability: String },

    #[error("initial value rejected")]
    InitialValue(#[source] InvalidValueError),

    #[error("{entity} {id} references unknown {reference} {target}")]
    UnknownReference {
        entity: &'static str,
        id: String,
        reference: &'static str,
        target: String,
    },

    #[error("scene {scene_id} step {index} is invalid: {reason}")]
    SceneStep {
        scene_id: String,
        index: usize,
        reason: String,
    },
}
