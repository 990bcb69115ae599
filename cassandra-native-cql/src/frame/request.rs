//! Requests the driver core hands to a connection.

use std::fmt;

use bytes::Bytes;

use super::server_event_type::EventType;
use super::value::SerializedValues;
use crate::Consistency;

/// Opcode of a request, used mostly for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestOpcode {
    Query,
    Prepare,
    Execute,
    Register,
}

impl fmt::Display for RequestOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestOpcode::Query => "QUERY",
            RequestOpcode::Prepare => "PREPARE",
            RequestOpcode::Execute => "EXECUTE",
            RequestOpcode::Register => "REGISTER",
        };
        f.write_str(s)
    }
}

/// A request ready to be framed and written by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Executes an unprepared statement.
    Query {
        contents: String,
        consistency: Consistency,
    },
    /// Prepares a statement on the coordinator.
    Prepare { contents: String },
    /// Executes a previously prepared statement.
    Execute {
        id: Bytes,
        values: SerializedValues,
        consistency: Consistency,
    },
    /// Subscribes the connection to server push notifications.
    Register { event_types: Vec<EventType> },
}

impl Request {
    pub fn opcode(&self) -> RequestOpcode {
        match self {
            Request::Query { .. } => RequestOpcode::Query,
            Request::Prepare { .. } => RequestOpcode::Prepare,
            Request::Execute { .. } => RequestOpcode::Execute,
            Request::Register { .. } => RequestOpcode::Register,
        }
    }
}
