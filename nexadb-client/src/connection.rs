//! Connection management.

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::exchange::{classify, read_frame, write_frame, READ_BUFFER_SIZE};
use crate::watcher::{ChangeStream, Subscription};
use bytes::BytesMut;
use nexadb_protocol::{Encoder, HandshakeParams, MessageType, Record, SubscribeParams};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A connection to a NexaDB server.
///
/// One request is in flight at a time: the wire protocol carries no request
/// ids, so every exchange takes `&mut self`. Share a connection between
/// tasks through [`crate::Client`].
pub struct Connection {
    pub(crate) config: ConnectionConfig,
    /// Read half of the socket. Lent to the change-stream receiver while a
    /// watch is active.
    pub(crate) reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    /// Bytes received past the last decoded frame.
    pub(crate) read_buf: BytesMut,
    /// A watch that was dropped without being stopped; shut down before the
    /// socket is used again.
    pub(crate) parked: Option<Subscription>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            reader: None,
            writer: None,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            parked: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Connects to the server and performs the handshake.
    ///
    /// A no-op while already connected. If the handshake is rejected the
    /// socket is closed again before the error is returned.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }

        let addr = self.config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(self.config.timeout(), TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::Connect {
                addr: addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| {
                tracing::debug!("Connection to {} failed: {}", addr, source);
                ClientError::Connect {
                    addr: addr.clone(),
                    source,
                }
            })?;

        stream.set_nodelay(true).ok();

        let (reader, writer) = stream.into_split();
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.read_buf.clear();

        tracing::debug!("TCP connected, starting handshake");
        if let Err(e) = self.handshake().await {
            tracing::debug!("Handshake failed: {}", e);
            self.disconnect().await;
            return Err(e);
        }
        tracing::debug!("Handshake complete");

        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), ClientError> {
        let params = HandshakeParams {
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            client_name: Some(self.config.client_name.clone()),
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        };
        self.request(MessageType::Connect, &params, false).await?;
        Ok(())
    }

    /// Closes the connection. Idempotent and infallible.
    ///
    /// Nothing is sent on the wire; the server sees the socket close.
    pub async fn disconnect(&mut self) {
        if let Some(subscription) = self.parked.take() {
            subscription.abort();
        }

        if let Some(mut writer) = self.writer.take() {
            tracing::debug!("Closing connection to {}", self.config.addr());
            let _ = writer.shutdown().await;
        }
        self.reader = None;
        self.read_buf.clear();
    }

    /// Sends one request and waits for its reply.
    ///
    /// Fails with [`ClientError::NotConnected`] before touching the socket
    /// when the connection is not established.
    pub async fn exchange<T>(
        &mut self,
        message_type: MessageType,
        payload: &T,
    ) -> Result<Record, ClientError>
    where
        T: Serialize + ?Sized,
    {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.finish_parked().await;

        self.request(message_type, payload, false).await
    }

    /// Sends a PING and waits for the PONG.
    pub async fn ping(&mut self) -> Result<Record, ClientError> {
        self.exchange(MessageType::Ping, &Record::new()).await
    }

    /// Subscribes to change events and starts streaming them.
    ///
    /// The returned stream borrows the connection exclusively until it is
    /// stopped or dropped.
    pub async fn watch(
        &mut self,
        params: SubscribeParams,
    ) -> Result<ChangeStream<&mut Connection>, ClientError> {
        ChangeStream::start(self, params).await
    }

    /// Runs one timed round trip. Errors that leave the byte stream out of
    /// sync close the socket.
    pub(crate) async fn request<T>(
        &mut self,
        message_type: MessageType,
        payload: &T,
        skip_events: bool,
    ) -> Result<Record, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = Encoder::encode_payload(message_type, payload)?;
        tracing::debug!(
            "Sending {} request ({} bytes)",
            message_type,
            encoded.len()
        );

        let result = tokio::time::timeout(
            self.config.timeout(),
            self.round_trip(&encoded, skip_events),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout));

        if let Err(ref e) = result {
            if e.breaks_connection() {
                tracing::warn!("{} request failed, closing connection: {}", message_type, e);
                self.drop_socket();
            }
        }
        result
    }

    async fn round_trip(
        &mut self,
        encoded: &[u8],
        skip_events: bool,
    ) -> Result<Record, ClientError> {
        let (Some(writer), Some(reader)) = (self.writer.as_mut(), self.reader.as_mut()) else {
            // The read half went down with a receiver that never handed it
            // back. Nothing may be written that could not be read back.
            self.drop_socket();
            return Err(ClientError::NotConnected);
        };
        write_frame(writer, encoded).await?;

        loop {
            let frame = read_frame(reader, &mut self.read_buf, self.config.max_payload_size).await?;
            if skip_events && frame.message_type == MessageType::ChangeEvent.code() {
                tracing::trace!("Discarding change event received during unsubscribe");
                continue;
            }
            return classify(&frame);
        }
    }

    /// Shuts down a watch left behind by a dropped stream.
    async fn finish_parked(&mut self) {
        if let Some(subscription) = self.parked.take() {
            tracing::debug!("Finishing shutdown of a dropped change stream");
            self.end_subscription(subscription).await;
        }
    }

    /// Stops a subscription's receiver, takes the read half back and sends a
    /// best-effort unsubscribe.
    pub(crate) async fn end_subscription(&mut self, subscription: Subscription) {
        match subscription.shutdown(self.config.watch_join_timeout()).await {
            Some(side) => {
                self.reader = Some(side.reader);
                self.read_buf = side.buf;
            }
            None => {
                self.drop_socket();
                return;
            }
        }

        if let Err(e) = self
            .request(MessageType::UnsubscribeChanges, &Record::new(), true)
            .await
        {
            tracing::debug!("Unsubscribe failed (ignored): {}", e);
        }
    }

    fn drop_socket(&mut self) {
        self.reader = None;
        self.writer = None;
        self.read_buf.clear();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(subscription) = self.parked.take() {
            subscription.abort();
        }
    }
}
