//! Frame I/O over a byte stream and reply classification.

use crate::error::ClientError;
use bytes::BytesMut;
use nexadb_protocol::{Frame, MessageType, Record, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial capacity of a connection's read buffer (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Reads exactly one frame, buffering any bytes that arrive past it.
///
/// Cancel-safe: bytes read before the future is dropped stay in `buf`.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_payload: u32,
) -> Result<Frame, ClientError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = Frame::decode_with_limit(buf, max_payload)? {
            tracing::trace!(
                message_type = frame.message_type,
                payload_len = frame.payload.len(),
                "decoded frame"
            );
            return Ok(frame);
        }

        if buf.capacity() == buf.len() {
            buf.reserve(READ_BUFFER_SIZE);
        }
        let n = reader.read_buf(buf).await?;
        if n == 0 {
            tracing::debug!(buffered = buf.len(), "connection closed while reading frame");
            return Err(ClientError::ConnectionClosed);
        }
    }
}

/// Writes an encoded frame in full.
pub(crate) async fn write_frame<W>(writer: &mut W, encoded: &[u8]) -> Result<(), ClientError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Maps a reply frame to its record or to the error it reports.
pub(crate) fn classify(frame: &Frame) -> Result<Record, ClientError> {
    match frame.kind()? {
        MessageType::Success | MessageType::Pong => Ok(frame.record()?),
        MessageType::Error => Err(ClientError::Server {
            message: error_message(frame, "Unknown error"),
        }),
        MessageType::NotFound => Err(ClientError::NotFound {
            message: error_message(frame, "Not found"),
        }),
        MessageType::Duplicate => Err(ClientError::Duplicate {
            message: error_message(frame, "Duplicate"),
        }),
        other => Err(ClientError::UnexpectedResponse(other.code())),
    }
}

/// Extracts the `error` text of a failure reply. An unreadable payload
/// still yields the fallback so the reply kind is never lost.
fn error_message(frame: &Frame, fallback: &str) -> String {
    frame
        .record()
        .ok()
        .and_then(|mut record| match record.remove("error") {
            Some(Value::String(message)) => Some(message),
            _ => None,
        })
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use bytes::Bytes;
    use nexadb_protocol::{
        encode_record, Encoder, ProtocolError, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE,
    };
    use tokio_test::io::Builder;

    const NO_LIMIT: u32 = MAX_PAYLOAD_SIZE;

    fn reply(kind: MessageType, fields: &[(&str, Value)]) -> Frame {
        let record: Record = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Frame::new(kind, Bytes::from(encode_record(&record).unwrap()))
    }

    #[test]
    fn test_classify_success_returns_record_unmodified() {
        let frame = reply(
            MessageType::Success,
            &[("document_id", "abc123".into()), ("collection", "users".into())],
        );
        let record = classify(&frame).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record["document_id"], Value::from("abc123"));
    }

    #[test]
    fn test_classify_pong_with_empty_payload() {
        let frame = Frame::new(MessageType::Pong, Bytes::new());
        assert!(classify(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_classify_error_uses_error_field() {
        let frame = reply(MessageType::Error, &[("error", "Invalid query".into())]);
        match classify(&frame) {
            Err(ClientError::Server { message }) => assert_eq!(message, "Invalid query"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_default_message() {
        let frame = reply(MessageType::Error, &[]);
        match classify(&frame) {
            Err(ClientError::Server { message }) => assert_eq!(message, "Unknown error"),
            other => panic!("unexpected: {:?}", other),
        }

        // An unreadable payload still classifies by message type.
        let frame = Frame::new(MessageType::Error, Bytes::from_static(&[0xC1]));
        assert_eq!(classify(&frame).unwrap_err().kind(), ErrorKind::Remote);
    }

    #[test]
    fn test_classify_not_found_and_duplicate() {
        let err = classify(&reply(MessageType::NotFound, &[])).unwrap_err();
        assert!(err.is_not_found());

        let frame = reply(MessageType::Duplicate, &[("error", "exists".into())]);
        let err = classify(&frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert!(err.to_string().contains("exists"));
    }

    #[test]
    fn test_classify_unexpected_codes() {
        let err = classify(&reply(MessageType::ChangeEvent, &[])).unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(0x90)));
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let frame = Frame {
            version: 1,
            message_type: 0xEE,
            flags: 0,
            payload: Bytes::new(),
        };
        assert_eq!(classify(&frame).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_classify_bad_success_payload_is_decode_error() {
        let frame = Frame::new(MessageType::Success, Bytes::from_static(&[0x93, 1, 2, 3]));
        assert_eq!(classify(&frame).unwrap_err().kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_read_frame_split_across_reads() {
        let encoded = Encoder::encode(MessageType::Success, &Record::new()).unwrap();
        let (head, tail) = encoded.split_at(5);

        let mut mock = Builder::new().read(head).read(tail).build();
        let mut buf = BytesMut::new();
        let frame = read_frame(&mut mock, &mut buf, NO_LIMIT).await.unwrap();

        assert_eq!(frame.kind().unwrap(), MessageType::Success);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_keeps_following_bytes() {
        let mut both = BytesMut::new();
        for kind in [MessageType::ChangeEvent, MessageType::Success] {
            both.extend_from_slice(&Encoder::encode(kind, &Record::new()).unwrap());
        }

        let mut mock = Builder::new().read(&both).build();
        let mut buf = BytesMut::new();
        let first = read_frame(&mut mock, &mut buf, NO_LIMIT).await.unwrap();
        let second = read_frame(&mut mock, &mut buf, NO_LIMIT).await.unwrap();

        assert_eq!(first.kind().unwrap(), MessageType::ChangeEvent);
        assert_eq!(second.kind().unwrap(), MessageType::Success);
    }

    #[tokio::test]
    async fn test_read_frame_eof_mid_frame() {
        let encoded = Encoder::encode(MessageType::Success, &Record::new()).unwrap();
        let mut mock = Builder::new().read(&encoded[..7]).build();
        let mut buf = BytesMut::new();

        let err = read_frame(&mut mock, &mut buf, NO_LIMIT).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_read_frame_bad_magic() {
        let mut mock = Builder::new().read(b"HTTP/1.1 400").build();
        let mut buf = BytesMut::new();

        let err = read_frame(&mut mock, &mut buf, NO_LIMIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_read_frame_large_reply() {
        let mut record = Record::new();
        record.insert("toon".into(), "x".repeat(17 * 1024 * 1024).into());
        let encoded = Encoder::encode(MessageType::Success, &record).unwrap();
        let (head, tail) = encoded.split_at(FRAME_HEADER_SIZE + 1024);

        let mut mock = Builder::new().read(head).read(tail).build();
        let mut buf = BytesMut::new();
        let frame = read_frame(&mut mock, &mut buf, NO_LIMIT).await.unwrap();
        assert_eq!(classify(&frame).unwrap(), record);
    }

    #[tokio::test]
    async fn test_read_frame_over_limit() {
        let mut record = Record::new();
        record.insert("toon".into(), "x".repeat(4096).into());
        let encoded = Encoder::encode(MessageType::Success, &record).unwrap();

        // Only the header is needed to refuse the frame.
        let mut mock = Builder::new().read(&encoded[..FRAME_HEADER_SIZE]).build();
        let mut buf = BytesMut::new();
        let err = read_frame(&mut mock, &mut buf, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::FrameTooLarge { max: 1024, .. })
        ));
        assert!(err.breaks_connection());
    }

    #[tokio::test]
    async fn test_write_frame() {
        let encoded = Encoder::encode(MessageType::Ping, &Record::new()).unwrap();
        let mut mock = Builder::new().write(&encoded).build();
        write_frame(&mut mock, &encoded).await.unwrap();
    }
}
