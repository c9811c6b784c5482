//! In-process stub server for transport tests.

use crate::config::ConnectionConfig;
use bytes::BytesMut;
use nexadb_protocol::{Encoder, Frame, MessageType, Record, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub(crate) fn record(fields: &[(&str, Value)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub(crate) fn test_config(addr: SocketAddr) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(addr.ip().to_string(), addr.port())
        .with_timeout(Duration::from_secs(5))
        .with_watch_poll_interval(Duration::from_millis(50));
    config.watch_join_timeout_ms = 1000;
    config
}

/// Accepts one client and runs `script` against it.
pub(crate) async fn serve<F, Fut, T>(script: F) -> (SocketAddr, JoinHandle<T>)
where
    F: FnOnce(Peer) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(Peer {
            stream,
            buf: BytesMut::new(),
        })
        .await
    });
    (addr, handle)
}

/// The server end of a test connection.
pub(crate) struct Peer {
    stream: TcpStream,
    buf: BytesMut,
}

impl Peer {
    /// Reads the next request. `None` once the client has closed.
    pub(crate) async fn recv(&mut self) -> Option<(MessageType, Record)> {
        loop {
            if let Some(frame) = Frame::decode(&mut self.buf).unwrap() {
                return Some((frame.kind().unwrap(), frame.record().unwrap()));
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    pub(crate) async fn expect(&mut self, kind: MessageType) -> Record {
        let (received, payload) = self.recv().await.expect("client closed the connection");
        assert_eq!(received, kind);
        payload
    }

    pub(crate) async fn reply(&mut self, kind: MessageType, payload: Record) {
        let encoded = Encoder::encode(kind, &payload).unwrap();
        self.send_raw(&encoded).await;
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        let _ = self.stream.write_all(bytes).await;
    }

    pub(crate) async fn accept_handshake(&mut self) {
        self.expect(MessageType::Connect).await;
        self.reply(MessageType::Success, Record::new()).await;
    }

    /// Pushes a change event for document `id` in `nexadb.orders`.
    pub(crate) async fn event(&mut self, operation: &str, id: &str) {
        let payload = record(&[
            ("operationType", operation.into()),
            (
                "ns",
                Value::Map(record(&[("db", "nexadb".into()), ("coll", "orders".into())])),
            ),
            ("documentKey", Value::Map(record(&[("_id", id.into())]))),
            ("timestamp", Value::Float(1_700_000_000.123)),
        ]);
        self.reply(MessageType::ChangeEvent, payload).await;
    }

    /// Swallows requests until the client closes.
    pub(crate) async fn hold(&mut self) {
        while self.recv().await.is_some() {}
    }
}
