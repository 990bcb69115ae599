//! Kinds of server push notifications a connection can subscribe to.

use std::fmt;
use std::str::FromStr;

use super::frame_errors::CqlEventParseError;

/// Represents the type of a server event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::enum_variant_names)]
pub enum EventType {
    /// Nodes joining or leaving the cluster.
    TopologyChange,
    /// Nodes going up or down.
    StatusChange,
    /// Keyspaces, tables, types, functions or aggregates being created, altered or dropped.
    SchemaChange,
}

impl EventType {
    /// Every event type, in registration order.
    pub const ALL: [EventType; 3] = [
        EventType::TopologyChange,
        EventType::StatusChange,
        EventType::SchemaChange,
    ];
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match &self {
            Self::TopologyChange => "TOPOLOGY_CHANGE",
            Self::StatusChange => "STATUS_CHANGE",
            Self::SchemaChange => "SCHEMA_CHANGE",
        };

        write!(f, "{s}")
    }
}

impl FromStr for EventType {
    type Err = CqlEventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TOPOLOGY_CHANGE" => Ok(Self::TopologyChange),
            "STATUS_CHANGE" => Ok(Self::StatusChange),
            "SCHEMA_CHANGE" => Ok(Self::SchemaChange),
            _ => Err(CqlEventParseError::UnknownEventType(s.to_string())),
        }
    }
}
