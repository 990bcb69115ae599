//! Connection and request-execution core of an async driver for Apache Cassandra®.
//!
//! # Driver overview
//! ### Connecting
//! All driver activity revolves around the [Session](client::session::Session).
//! A `Session` is created from a few known nodes and a [Connector](network::Connector),
//! which opens the multiplexed connections the session pools:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! use cassandra_native::client::session::Session;
//! use cassandra_native::client::session_builder::SessionBuilder;
//! use cassandra_native::network::Connector;
//!
//! # async fn example(connector: Arc<dyn Connector>) -> Result<(), Box<dyn std::error::Error>> {
//! let session: Session = SessionBuilder::new()
//!     .known_node("127.0.0.1:9042")
//!     .known_node("db2.example.com")
//!     .connector(connector)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Making requests
//! Every request kind goes through the same dispatch loop: a connection is acquired
//! from the pool of the first usable host of a fresh query plan, the request is sent,
//! and on failure the session either fails over to the next host or asks the
//! [RetryPolicy](policies::retry::RetryPolicy) what to do.
//!
//! ```rust,no_run
//! # use cassandra_native::client::session::Session;
//! # async fn example(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
//! session.use_keyspace("ks", false).await?;
//! let result = session.query("SELECT a, b FROM tab").await?;
//! println!("served by {}", result.coordinator());
//! # Ok(())
//! # }
//! ```
//!
//! ### Cluster membership
//! One pooled connection per session is registered for server push notifications.
//! Topology and status changes are applied to the session's host registry and affect
//! every query plan computed afterwards.

pub mod frame {
    //! Protocol-level types shared with connection implementations.
    pub use cassandra_native_cql::frame::{frame_errors, request, server_event_type, value};

    pub mod types {
        //! In-wire enumerations.
        pub use cassandra_native_cql::frame::types::Consistency;
    }

    pub mod response {
        //! Decoded responses.
        pub use cassandra_native_cql::frame::response::*;
    }
}

pub mod client;
pub mod cluster;
pub mod errors;
pub mod execution;
pub mod network;
pub mod policies;
pub mod response;
pub mod routing;
pub mod statement;

pub(crate) mod utils;

/// This module is NOT part of the public API (it is `pub` only for internal use of integration tests).
/// Future minor releases are free to introduce breaking API changes inside it.
#[doc(hidden)]
pub use utils::test_utils;

pub use cassandra_native_cql::Consistency;
pub use client::session::Session;
pub use client::session_builder::SessionBuilder;
pub use response::query_result::QueryResult;
