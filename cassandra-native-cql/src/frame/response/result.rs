//! Bodies of `RESULT` responses.

use bytes::Bytes;

use super::event::SchemaChangeEvent;
use super::CqlResponseKind;

/// Keyspace and table a column belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub ks_name: String,
    pub table_name: String,
}

/// Column type as announced in result metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ColumnType {
    Ascii,
    Boolean,
    Blob,
    Counter,
    Double,
    Float,
    Int,
    BigInt,
    Text,
    Timestamp,
    Uuid,
    Varint,
    List(Box<ColumnType>),
    Set(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table_spec: TableSpec,
    pub name: String,
    pub typ: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub col_specs: Vec<ColumnSpec>,
}

/// Metadata of a prepared statement's bind markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedMetadata {
    /// Positions of partition key columns among bind markers.
    pub pk_indexes: Vec<u16>,
    pub col_specs: Vec<ColumnSpec>,
}

/// One row; cells are left serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub columns: Vec<Option<Bytes>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rows {
    pub metadata: ResultMetadata,
    pub rows: Vec<Row>,
}

/// Acknowledges a `USE` statement with the keyspace the server switched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeyspace {
    pub keyspace_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Opaque statement id assigned by the server.
    pub id: Bytes,
    pub prepared_metadata: PreparedMetadata,
    pub result_metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub event: SchemaChangeEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Result {
    Void,
    Rows(Rows),
    SetKeyspace(SetKeyspace),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

impl Result {
    pub fn kind(&self) -> CqlResponseKind {
        match self {
            Result::Void => CqlResponseKind::Void,
            Result::Rows(_) => CqlResponseKind::Rows,
            Result::SetKeyspace(_) => CqlResponseKind::SetKeyspace,
            Result::Prepared(_) => CqlResponseKind::Prepared,
            Result::SchemaChange(_) => CqlResponseKind::SchemaChange,
        }
    }
}
