//! # pulse-core
//!
//! Foundation types shared by every Pulse crate:
//!
//! - Branded ID newtypes ([`ids`])
//! - Event kinds and the immutable [`events::Event`] unit of fan-out
//! - The transport-agnostic JSON wire envelope ([`envelope`])
//! - Connection close reasons ([`close::CloseReason`])
//!
//! This crate performs no I/O and has no async dependencies.

#![deny(unsafe_code)]

pub mod close;
pub mod envelope;
pub mod events;
pub mod ids;

pub use close::CloseReason;
pub use envelope::{ClientEnvelope, CommandKind, ServerFrame};
pub use events::{Event, EventKind};
pub use ids::{ConnectionId, MessageId};
