//! Errors raised while interpreting decoded frames.

use super::server_event_type::EventType;
use thiserror::Error;

/// An error that occurred while turning a raw push notification into an [Event](super::response::event::Event).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CqlEventParseError {
    /// The event type string is not one the driver registers for.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The change kind is not valid for the given event type.
    #[error("Unknown change '{change}' for event type {event_type}")]
    UnknownChange {
        /// Type of the event carrying the change.
        event_type: EventType,
        /// The change string as received.
        change: String,
    },

    /// A topology or status event arrived without the affected node's address.
    #[error("Event of type {0} carries no node address")]
    MissingAddress(EventType),

    /// A schema change targets an object kind the protocol does not define.
    #[error("Unknown schema change target: {0}")]
    UnknownSchemaTarget(String),

    /// A schema change arrived without the affected keyspace.
    #[error("Schema change event carries no keyspace name")]
    MissingKeyspace,
}
