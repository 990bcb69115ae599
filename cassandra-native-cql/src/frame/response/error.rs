//! Server-side errors carried by `ERROR` responses.

use crate::Consistency;
use bytes::Bytes;
use thiserror::Error;

/// Body of an `ERROR` response: a typed error plus the server's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error: DbError,
    pub reason: String,
}

/// An error reported by the coordinator, keyed by its protocol error code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DbError {
    #[error("Internal server error")]
    ServerError,

    #[error("The server rejected the message as a protocol error")]
    ProtocolError,

    #[error("Authentication failed")]
    AuthenticationError,

    #[error(
        "Not enough replicas alive to satisfy consistency {consistency} \
        (required: {required}, alive: {alive})"
    )]
    Unavailable {
        consistency: Consistency,
        required: i32,
        alive: i32,
    },

    #[error("Coordinator is overloaded")]
    Overloaded,

    #[error("Coordinator is still bootstrapping")]
    IsBootstrapping,

    #[error("Truncate failed")]
    TruncateError,

    #[error(
        "Write timed out at consistency {consistency} \
        (received: {received}, required: {required}, write_type: {write_type})"
    )]
    WriteTimeout {
        consistency: Consistency,
        received: i32,
        required: i32,
        write_type: WriteType,
    },

    #[error(
        "Read timed out at consistency {consistency} \
        (received: {received}, required: {required}, data_present: {data_present})"
    )]
    ReadTimeout {
        consistency: Consistency,
        received: i32,
        required: i32,
        /// Whether the replica asked for data did answer.
        data_present: bool,
    },

    #[error(
        "Read failed at consistency {consistency} \
        (received: {received}, required: {required}, failures: {numfailures})"
    )]
    ReadFailure {
        consistency: Consistency,
        received: i32,
        required: i32,
        numfailures: i32,
        data_present: bool,
    },

    #[error("Function {keyspace}.{function} failed")]
    FunctionFailure {
        keyspace: String,
        function: String,
        arg_types: Vec<String>,
    },

    #[error(
        "Write failed at consistency {consistency} \
        (received: {received}, required: {required}, failures: {numfailures})"
    )]
    WriteFailure {
        consistency: Consistency,
        received: i32,
        required: i32,
        numfailures: i32,
        write_type: WriteType,
    },

    #[error("Syntax error in statement")]
    SyntaxError,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid statement")]
    Invalid,

    #[error("Configuration error")]
    ConfigError,

    #[error("Already exists: {keyspace}.{table}")]
    AlreadyExists {
        keyspace: String,
        /// Empty when a keyspace was being created.
        table: String,
    },

    /// The coordinator does not know the statement id; it has to be prepared again.
    #[error("Statement is not prepared on the coordinator")]
    Unprepared { statement_id: Bytes },

    #[error("Unknown error code {0}")]
    Other(i32),
}

impl DbError {
    /// Protocol error code of this error.
    pub fn code(&self) -> i32 {
        match self {
            DbError::ServerError => 0x0000,
            DbError::ProtocolError => 0x000A,
            DbError::AuthenticationError => 0x0100,
            DbError::Unavailable { .. } => 0x1000,
            DbError::Overloaded => 0x1001,
            DbError::IsBootstrapping => 0x1002,
            DbError::TruncateError => 0x1003,
            DbError::WriteTimeout { .. } => 0x1100,
            DbError::ReadTimeout { .. } => 0x1200,
            DbError::ReadFailure { .. } => 0x1300,
            DbError::FunctionFailure { .. } => 0x1400,
            DbError::WriteFailure { .. } => 0x1500,
            DbError::SyntaxError => 0x2000,
            DbError::Unauthorized => 0x2100,
            DbError::Invalid => 0x2200,
            DbError::ConfigError => 0x2300,
            DbError::AlreadyExists { .. } => 0x2400,
            DbError::Unprepared { .. } => 0x2500,
            DbError::Other(code) => *code,
        }
    }
}

/// Kind of write that timed out or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    /// The batch log write itself timed out.
    BatchLog,
    Cas,
    View,
    Cdc,
    Other(String),
}

impl std::fmt::Display for WriteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for WriteType {
    fn from(write_type_str: &str) -> WriteType {
        match write_type_str {
            "SIMPLE" => WriteType::Simple,
            "BATCH" => WriteType::Batch,
            "UNLOGGED_BATCH" => WriteType::UnloggedBatch,
            "COUNTER" => WriteType::Counter,
            "BATCH_LOG" => WriteType::BatchLog,
            "CAS" => WriteType::Cas,
            "VIEW" => WriteType::View,
            "CDC" => WriteType::Cdc,
            _ => WriteType::Other(write_type_str.to_string()),
        }
    }
}

impl WriteType {
    pub fn as_str(&self) -> &str {
        match self {
            WriteType::Simple => "SIMPLE",
            WriteType::Batch => "BATCH",
            WriteType::UnloggedBatch => "UNLOGGED_BATCH",
            WriteType::Counter => "COUNTER",
            WriteType::BatchLog => "BATCH_LOG",
            WriteType::Cas => "CAS",
            WriteType::View => "VIEW",
            WriteType::Cdc => "CDC",
            WriteType::Other(write_type) => write_type.as_str(),
        }
    }
}
