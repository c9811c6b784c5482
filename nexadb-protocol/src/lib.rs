//! # nexadb-protocol
//!
//! Wire protocol implementation for NexaDB.
//!
//! This crate provides:
//! - Binary framing with a fixed 12-byte big-endian header
//! - Message type codes for requests and responses
//! - Schema-less MessagePack payload records
//! - Change event types pushed by the server

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod value;

pub use codec::{decode_payload, decode_record, encode_payload, encode_record, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FrameHeader, FRAME_HEADER_SIZE, MAGIC};
pub use message::{
    ChangeEvent, HandshakeParams, MessageType, Namespace, OperationType, SubscribeParams,
};
pub use value::{Record, Value};

/// Protocol version written into every frame header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port for the NexaDB binary protocol.
pub const DEFAULT_PORT: u16 = 6970;

/// Largest payload the 32-bit length field can describe. Receivers may
/// enforce a lower limit with [`Frame::decode_with_limit`].
pub const MAX_PAYLOAD_SIZE: u32 = u32::MAX;
