//! Server push notifications.
//!
//! A connection delivers notifications as [RawEvent]s: the strings it read off the
//! wire, unvalidated. [Event] is the checked form the driver acts upon.

use crate::frame::frame_errors::CqlEventParseError;
use crate::frame::server_event_type::EventType;
use std::net::SocketAddr;

/// A push notification as decoded by the connection, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// `TOPOLOGY_CHANGE`, `STATUS_CHANGE` or `SCHEMA_CHANGE`.
    pub event_type: String,
    /// `NEW_NODE`, `UP`, `CREATED`, ...
    pub change: String,
    /// Affected node, for topology and status events.
    pub address: Option<SocketAddr>,
    /// `KEYSPACE`, `TABLE`, `TYPE`, `FUNCTION` or `AGGREGATE`, for schema events.
    pub target: Option<String>,
    pub keyspace: Option<String>,
    /// Table, type, function or aggregate name.
    pub object: Option<String>,
    /// Argument types of a changed function or aggregate.
    pub arguments: Vec<String>,
}

impl RawEvent {
    pub fn topology(change: &str, address: SocketAddr) -> Self {
        Self {
            event_type: EventType::TopologyChange.to_string(),
            change: change.to_string(),
            address: Some(address),
            ..Default::default()
        }
    }

    pub fn status(change: &str, address: SocketAddr) -> Self {
        Self {
            event_type: EventType::StatusChange.to_string(),
            change: change.to_string(),
            address: Some(address),
            ..Default::default()
        }
    }

    pub fn schema(change: &str, target: &str, keyspace: &str, object: Option<&str>) -> Self {
        Self {
            event_type: EventType::SchemaChange.to_string(),
            change: change.to_string(),
            target: Some(target.to_string()),
            keyspace: Some(keyspace.to_string()),
            object: object.map(str::to_string),
            ..Default::default()
        }
    }
}

/// Event that the server notified the client about.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum Event {
    TopologyChange(TopologyChangeEvent),
    StatusChange(StatusChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyChangeEvent {
    NewNode(SocketAddr),
    RemovedNode(SocketAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChangeEvent {
    Up(SocketAddr),
    Down(SocketAddr),
}

/// Type of change that was made to the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

/// Schema object affected by a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangeTarget {
    Keyspace,
    Table(String),
    Type(String),
    Function { name: String, arguments: Vec<String> },
    Aggregate { name: String, arguments: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChangeEvent {
    pub change_type: SchemaChangeType,
    pub keyspace_name: String,
    pub target: SchemaChangeTarget,
}

fn require_address(raw: &RawEvent, event_type: EventType) -> Result<SocketAddr, CqlEventParseError> {
    raw.address
        .ok_or(CqlEventParseError::MissingAddress(event_type))
}

impl TryFrom<RawEvent> for Event {
    type Error = CqlEventParseError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let event_type: EventType = raw.event_type.parse()?;
        let unknown_change = |raw: &RawEvent| CqlEventParseError::UnknownChange {
            event_type,
            change: raw.change.clone(),
        };

        match event_type {
            EventType::TopologyChange => {
                let addr = require_address(&raw, event_type)?;
                match raw.change.as_str() {
                    "NEW_NODE" => Ok(Event::TopologyChange(TopologyChangeEvent::NewNode(addr))),
                    "REMOVED_NODE" => Ok(Event::TopologyChange(TopologyChangeEvent::RemovedNode(
                        addr,
                    ))),
                    _ => Err(unknown_change(&raw)),
                }
            }
            EventType::StatusChange => {
                let addr = require_address(&raw, event_type)?;
                match raw.change.as_str() {
                    "UP" => Ok(Event::StatusChange(StatusChangeEvent::Up(addr))),
                    "DOWN" => Ok(Event::StatusChange(StatusChangeEvent::Down(addr))),
                    _ => Err(unknown_change(&raw)),
                }
            }
            EventType::SchemaChange => {
                let change_type = match raw.change.as_str() {
                    "CREATED" => SchemaChangeType::Created,
                    "UPDATED" => SchemaChangeType::Updated,
                    "DROPPED" => SchemaChangeType::Dropped,
                    _ => return Err(unknown_change(&raw)),
                };
                let RawEvent {
                    target,
                    keyspace,
                    object,
                    arguments,
                    ..
                } = raw;
                let keyspace_name = keyspace.ok_or(CqlEventParseError::MissingKeyspace)?;
                let target_str = target.unwrap_or_default();
                let object = object.unwrap_or_default();
                let target = match target_str.as_str() {
                    "KEYSPACE" => SchemaChangeTarget::Keyspace,
                    "TABLE" => SchemaChangeTarget::Table(object),
                    "TYPE" => SchemaChangeTarget::Type(object),
                    "FUNCTION" => SchemaChangeTarget::Function {
                        name: object,
                        arguments,
                    },
                    "AGGREGATE" => SchemaChangeTarget::Aggregate {
                        name: object,
                        arguments,
                    },
                    _ => return Err(CqlEventParseError::UnknownSchemaTarget(target_str)),
                };
                Ok(Event::SchemaChange(SchemaChangeEvent {
                    change_type,
                    keyspace_name,
                    target,
                }))
            }
        }
    }
}
