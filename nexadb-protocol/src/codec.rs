//! Frame and payload encoding.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::MessageType;
use crate::value::{Record, Value};
use bytes::{Bytes, BytesMut};

/// MessagePack encoding of an empty map, used for zero-length payloads.
const EMPTY_MAP: &[u8] = &[0x80];

/// Serializes any value as a named MessagePack payload.
///
/// Structs are written as maps keyed by field name.
pub fn encode_payload<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Deserializes a MessagePack payload. An empty payload reads as an empty map.
pub fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let bytes = if bytes.is_empty() { EMPTY_MAP } else { bytes };
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Serializes a payload record.
pub fn encode_record(record: &Record) -> Result<Vec<u8>, ProtocolError> {
    encode_payload(record)
}

/// Deserializes a payload record.
///
/// An empty payload or a MessagePack `nil` reads as an empty record; any
/// other non-map value is rejected.
pub fn decode_record(bytes: &[u8]) -> Result<Record, ProtocolError> {
    match decode_payload::<Value>(bytes)? {
        Value::Map(map) => Ok(map),
        Value::Null => Ok(Record::new()),
        _ => Err(ProtocolError::InvalidRecord("payload is not a map")),
    }
}

/// Encodes payloads into complete frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a record into a frame of the given type.
    pub fn encode(message_type: MessageType, record: &Record) -> Result<BytesMut, ProtocolError> {
        Self::encode_payload(message_type, record)
    }

    /// Encodes any serializable payload into a frame of the given type.
    pub fn encode_payload<T: serde::Serialize + ?Sized>(
        message_type: MessageType,
        payload: &T,
    ) -> Result<BytesMut, ProtocolError> {
        let payload = encode_payload(payload)?;
        Frame::new(message_type, Bytes::from(payload)).encode()
    }
}

impl Frame {
    /// Decodes this frame's payload as a record.
    pub fn record(&self) -> Result<Record, ProtocolError> {
        decode_record(&self.payload)
    }
}
