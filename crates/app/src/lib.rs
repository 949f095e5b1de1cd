//! # synhome-app
//!
//! Application layer — the device registry, the command router and the
//! **port definitions** (traits) adapters implement.
//!
//! ## Responsibilities
//! - Define **port traits** at the edges of the core:
//!   - `Adapter` — connect to an external system, discover devices, send
//!     commands and stream status
//!   - `EventPublisher` — hand device events to observers
//!   - `IntentExtractor` — turn free text into a structured intent
//! - Own every device in the `DeviceRegistry`, with bindings, groups and scenes
//! - Route commands through `CommandRouter`: apply under the device's
//!   exclusion scope, publish events, dispatch to the bound adapter
//! - Feed adapter status back into devices (`spawn_status_ingestion`)
//! - Provide **in-process infrastructure** shared by adapters (event bus,
//!   connection state cell, status feed, command templates)
//!
//! ## Dependency rule
//! Depends on `synhome-domain` only (plus `tokio` for synchronisation).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod connection;
pub mod event_bus;
pub mod ingest;
pub mod ports;
pub mod registry;
pub mod report;
pub mod router;
pub mod status;
pub mod template;
