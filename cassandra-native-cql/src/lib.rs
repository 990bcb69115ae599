//! Defines the protocol-level types exchanged between the `cassandra-native` driver core
//! and the connections it drives.
//!
//! Byte-level framing lives in the connection implementation; this crate only
//! carries the decoded shapes of requests, responses and server push events.

pub mod frame;

pub use crate::frame::types::Consistency;
