//! # synhome-domain
//!
//! Pure domain model for the synhome smart-home core.
//!
//! ## Responsibilities
//! - Define **Capabilities** (typed, constrained controls: switch, number, enum)
//! - Define **Devices** and the atomic apply-command operation
//! - Define **State rules** deriving a device's coarse state from its power
//! - Define **Physical bindings** and **status maps** linking devices to adapters
//! - Define the **reconnection policy** and the adapter **connection state**
//! - Define **Intents**, **groups** and **scenes** consumed by the router
//! - Define change **events** and the error taxonomy
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod binding;
pub mod capability;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod event;
pub mod intent;
pub mod reconnect;
pub mod scene;
pub mod snapshot;
pub mod state_rules;
pub mod status_map;
pub mod value;
