//! # pulse-channels
//!
//! Tenant-scoped channel registry and access control.
//!
//! A [`Channel`] is a named, typed topic owned by exactly one organization.
//! The [`ChannelRegistry`] owns the mapping from logical names to globally
//! unique full names and answers every access-control query. All operations
//! are pure and local — the registry never performs I/O.

#![deny(unsafe_code)]

pub mod channel;
pub mod registry;

pub use channel::{Channel, ChannelKind};
pub use registry::{
    ChannelRegistry, OrganizationStats, RegistryError, SubscriptionOutcome,
};
