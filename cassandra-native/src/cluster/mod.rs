//! Cluster membership as seen by one session.

pub mod host;
pub(crate) mod events;
pub(crate) mod registry;

pub use host::{Host, KnownNode};
