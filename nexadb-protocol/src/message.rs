//! Message type codes and typed payloads.

use crate::error::ProtocolError;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type codes.
///
/// Requests (client to server) live in `0x01..=0x7F`, responses (server to
/// client) in `0x80..=0xFF`, so a received code identifies its direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Session
    Connect = 0x01,
    Ping = 0x09,
    Disconnect = 0x0A,

    // Documents
    Create = 0x02,
    Read = 0x03,
    Update = 0x04,
    Delete = 0x05,
    Query = 0x06,
    VectorSearch = 0x07,
    BatchWrite = 0x08,
    QueryToon = 0x0B,
    ExportToon = 0x0C,

    // Collections
    ListCollections = 0x20,
    DropCollection = 0x21,

    // Change streams
    SubscribeChanges = 0x30,
    UnsubscribeChanges = 0x31,

    // Databases
    ListDatabases = 0x40,
    CreateDatabase = 0x41,
    DropDatabase = 0x42,
    GetDatabaseStats = 0x43,
    CreateCollection = 0x44,
    BuildVectorIndex = 0x45,

    // Responses
    Success = 0x81,
    Error = 0x82,
    NotFound = 0x83,
    Duplicate = 0x84,
    Pong = 0x88,
    ChangeEvent = 0x90,
}

impl MessageType {
    /// Lowest code of the response range.
    pub const RESPONSE_BASE: u8 = 0x80;

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns whether this code travels client to server.
    pub fn is_request(self) -> bool {
        self.code() < Self::RESPONSE_BASE
    }

    /// Returns whether this code travels server to client.
    pub fn is_response(self) -> bool {
        !self.is_request()
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, ProtocolError> {
        let kind = match code {
            0x01 => MessageType::Connect,
            0x02 => MessageType::Create,
            0x03 => MessageType::Read,
            0x04 => MessageType::Update,
            0x05 => MessageType::Delete,
            0x06 => MessageType::Query,
            0x07 => MessageType::VectorSearch,
            0x08 => MessageType::BatchWrite,
            0x09 => MessageType::Ping,
            0x0A => MessageType::Disconnect,
            0x0B => MessageType::QueryToon,
            0x0C => MessageType::ExportToon,
            0x20 => MessageType::ListCollections,
            0x21 => MessageType::DropCollection,
            0x30 => MessageType::SubscribeChanges,
            0x31 => MessageType::UnsubscribeChanges,
            0x40 => MessageType::ListDatabases,
            0x41 => MessageType::CreateDatabase,
            0x42 => MessageType::DropDatabase,
            0x43 => MessageType::GetDatabaseStats,
            0x44 => MessageType::CreateCollection,
            0x45 => MessageType::BuildVectorIndex,
            0x81 => MessageType::Success,
            0x82 => MessageType::Error,
            0x83 => MessageType::NotFound,
            0x84 => MessageType::Duplicate,
            0x88 => MessageType::Pong,
            0x90 => MessageType::ChangeEvent,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Connect => "CONNECT",
            MessageType::Create => "CREATE",
            MessageType::Read => "READ",
            MessageType::Update => "UPDATE",
            MessageType::Delete => "DELETE",
            MessageType::Query => "QUERY",
            MessageType::VectorSearch => "VECTOR_SEARCH",
            MessageType::BatchWrite => "BATCH_WRITE",
            MessageType::Ping => "PING",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::QueryToon => "QUERY_TOON",
            MessageType::ExportToon => "EXPORT_TOON",
            MessageType::ListCollections => "LIST_COLLECTIONS",
            MessageType::DropCollection => "DROP_COLLECTION",
            MessageType::SubscribeChanges => "SUBSCRIBE_CHANGES",
            MessageType::UnsubscribeChanges => "UNSUBSCRIBE_CHANGES",
            MessageType::ListDatabases => "LIST_DATABASES",
            MessageType::CreateDatabase => "CREATE_DATABASE",
            MessageType::DropDatabase => "DROP_DATABASE",
            MessageType::GetDatabaseStats => "GET_DATABASE_STATS",
            MessageType::CreateCollection => "CREATE_COLLECTION",
            MessageType::BuildVectorIndex => "BUILD_VECTOR_INDEX",
            MessageType::Success => "SUCCESS",
            MessageType::Error => "ERROR",
            MessageType::NotFound => "NOT_FOUND",
            MessageType::Duplicate => "DUPLICATE",
            MessageType::Pong => "PONG",
            MessageType::ChangeEvent => "CHANGE_EVENT",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Handshake and subscription payloads
// ============================================================================

/// Parameters for the CONNECT handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
}

/// Kinds of change reported by a change stream.
///
/// Travels as its camelCase name string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    DropCollection,
    /// An operation kind this client does not know yet.
    Unknown,
}

impl OperationType {
    /// Operations watched when the caller does not pick any.
    pub const DEFAULT_WATCHED: [OperationType; 3] = [
        OperationType::Insert,
        OperationType::Update,
        OperationType::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::DropCollection => "dropCollection",
            OperationType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(OperationType::Insert),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            "dropCollection" | "drop_collection" => Ok(OperationType::DropCollection),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

impl Serialize for OperationType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or(OperationType::Unknown))
    }
}

/// Parameters for SUBSCRIBE_CHANGES request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeParams {
    /// Collection to watch; `None` watches every collection.
    pub collection: Option<String>,
    pub operations: Vec<OperationType>,
}

impl Default for SubscribeParams {
    fn default() -> Self {
        Self {
            collection: None,
            operations: OperationType::DEFAULT_WATCHED.to_vec(),
        }
    }
}

impl SubscribeParams {
    /// Watches one collection for the default operations.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
            ..Default::default()
        }
    }

    /// Replaces the watched operations. An empty list keeps the defaults.
    pub fn with_operations(mut self, operations: impl IntoIterator<Item = OperationType>) -> Self {
        let operations: Vec<_> = operations.into_iter().collect();
        if !operations.is_empty() {
            self.operations = operations;
        }
        self
    }
}

// ============================================================================
// Change events
// ============================================================================

/// Database/collection pair a change happened in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(rename = "db", default)]
    pub database: String,
    #[serde(rename = "coll", default)]
    pub collection: String,
}

/// An asynchronous change pushed by the server on a subscribed connection.
///
/// Only `operationType` is required; other fields are absent when they do
/// not apply to the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub operation_type: OperationType,
    #[serde(rename = "ns", default)]
    pub namespace: Namespace,
    #[serde(default)]
    pub document_key: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_description: Option<Value>,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: f64,
}

impl ChangeEvent {
    pub fn new(operation_type: OperationType, namespace: Namespace) -> Self {
        Self {
            operation_type,
            namespace,
            document_key: Value::Null,
            full_document: None,
            update_description: None,
            timestamp: 0.0,
        }
    }

    /// Returns the `_id` inside the document key, if any.
    pub fn document_id(&self) -> Option<&str> {
        self.document_key.get("_id").and_then(Value::as_str)
    }

    /// Returns the event time, if the timestamp is representable.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        if !self.timestamp.is_finite() || self.timestamp <= 0.0 {
            return None;
        }
        let secs = self.timestamp.trunc() as i64;
        let nanos = (self.timestamp.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}
