//! # hearth-core
//!
//! Shared vocabulary for the Hearth broadcast layer:
//!
//! - **Identifiers**: `UserId`, `FamilyId` (UUID newtypes) and `ConnectionId`
//! - **Views**: read models of tasks, shopping lists and items carried in events
//! - **Envelope**: `EventEnvelope`, the discriminated wire contract pushed to
//!   every connected family member
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod logging;
pub mod views;

pub use envelope::{ALL_EVENT_TYPES, EnvelopeMismatch, EventEnvelope, EventPayload, EventType};
pub use logging::LogFormat;
pub use ids::{ConnectionId, FamilyId, UserId};
