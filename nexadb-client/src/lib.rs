//! # nexadb-client
//!
//! Client library for NexaDB.
//!
//! This crate provides:
//! - Async TCP connection with handshake and scoped release
//! - Synchronous request/response exchange with typed failures
//! - Change streams backed by a background receive task
//! - Pass-through helpers for document, collection and database operations

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
mod exchange;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use client::{Client, IndexParams, Query};
pub use config::{ConfigError, ConnectionConfig};
pub use connection::Connection;
pub use error::{ClientError, ErrorKind};
pub use nexadb_protocol::{ChangeEvent, MessageType, OperationType, Record, SubscribeParams, Value};
pub use watcher::ChangeStream;
