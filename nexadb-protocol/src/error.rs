//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or payload handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(
        "invalid protocol magic: expected {expected:#010x}, got {0:#010x}",
        expected = crate::MAGIC
    )]
    InvalidMagic(u32),

    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("payload encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("payload decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("invalid payload record: {0}")]
    InvalidRecord(&'static str),
}

impl ProtocolError {
    /// Returns whether the error came from the payload bytes rather than the
    /// frame envelope.
    pub fn is_decode(&self) -> bool {
        matches!(self, ProtocolError::Decode(_) | ProtocolError::InvalidRecord(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(0xDEADBEEF);
        let msg = err.to_string();
        assert!(msg.contains("0x4e455841"));
        assert!(msg.contains("0xdeadbeef"));

        let err = ProtocolError::UnknownMessageType(0x7F);
        assert!(err.to_string().contains("0x7f"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::InvalidRecord("expected a map");
        assert!(err.to_string().contains("expected a map"));
    }

    #[test]
    fn test_is_decode() {
        assert!(ProtocolError::InvalidRecord("x").is_decode());
        assert!(!ProtocolError::InvalidMagic(0).is_decode());
        assert!(!ProtocolError::UnknownMessageType(0).is_decode());
    }
}
