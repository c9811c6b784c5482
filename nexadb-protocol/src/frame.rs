//! Binary frame format.
//!
//! Frame layout (12 bytes header + payload), all fields big-endian:
//!
//! ```text
//! +---------+---------+--------------+---------+-------------+
//! | magic   | version | message_type | flags   | payload_len |
//! | 4 bytes | 1 byte  | 1 byte       | 2 bytes | 4 bytes     |
//! +---------+---------+--------------+---------+-------------+
//! | payload (payload_len bytes of MessagePack)                |
//! +-----------------------------------------------------------+
//! ```

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic number identifying NexaDB frames: "NEXA".
pub const MAGIC: u32 = 0x4E45_5841;

/// Size of the fixed frame header in bytes (4+1+1+2+4 = 12).
pub const FRAME_HEADER_SIZE: usize = 12;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u8,
    pub message_type: u8,
    /// Reserved, always zero on the wire.
    pub flags: u16,
    pub payload_length: u32,
}

impl FrameHeader {
    /// Parses a header, rejecting a wrong magic.
    pub fn parse(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let mut buf = &bytes[..];
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        Ok(Self {
            magic,
            version: buf.get_u8(),
            message_type: buf.get_u8(),
            flags: buf.get_u16(),
            payload_length: buf.get_u32(),
        })
    }

    /// Writes the header into `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.magic);
        buf.put_u8(self.version);
        buf.put_u8(self.message_type);
        buf.put_u16(self.flags);
        buf.put_u32(self.payload_length);
    }
}

/// A complete frame: header fields plus the raw payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Protocol version.
    pub version: u8,
    /// Raw message type code. Kept raw so unknown codes can be reported by
    /// whoever classifies the frame.
    pub message_type: u8,
    /// Reserved flags.
    pub flags: u16,
    /// MessagePack payload.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload.
    pub fn new(message_type: MessageType, payload: Bytes) -> Self {
        Self {
            version: crate::PROTOCOL_VERSION,
            message_type: message_type.code(),
            flags: 0,
            payload,
        }
    }

    /// Returns the typed message code, if it is one this crate knows.
    pub fn kind(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.message_type)
    }

    /// Returns the header that `encode` writes for this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            magic: MAGIC,
            version: self.version,
            message_type: self.message_type,
            flags: self.flags,
            payload_length: self.payload.len() as u32,
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len().min(u32::MAX as usize) as u32,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.header().write(&mut buf);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// The magic is checked as soon as four bytes are buffered.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        Self::decode_with_limit(buf, MAX_PAYLOAD_SIZE)
    }

    /// Like [`Frame::decode`], but fails with `FrameTooLarge` as soon as a
    /// header declares more than `max_payload` bytes, before any of the
    /// payload is buffered.
    pub fn decode_with_limit(
        buf: &mut BytesMut,
        max_payload: u32,
    ) -> Result<Option<Self>, ProtocolError> {
        if buf.len() >= 4 {
            let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            if magic != MAGIC {
                return Err(ProtocolError::InvalidMagic(magic));
            }
        }

        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::parse(&raw)?;
        if header.payload_length > max_payload {
            return Err(ProtocolError::FrameTooLarge {
                size: header.payload_length,
                max: max_payload,
            });
        }

        let total_len = FRAME_HEADER_SIZE + header.payload_length as usize;
        if buf.len() < total_len {
            buf.reserve(total_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.payload_length as usize).freeze();

        Ok(Some(Self {
            version: header.version,
            message_type: header.message_type,
            flags: header.flags,
            payload,
        }))
    }
}
