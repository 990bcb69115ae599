//! Connections to cluster nodes and the pools holding them.

pub(crate) mod connection;
pub(crate) mod connection_pool;

pub use connection::{Connection, Connector, ResponseFuture};
pub use connection_pool::PoolingOptions;
