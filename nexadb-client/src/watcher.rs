//! Change streams.
//!
//! A successful SUBSCRIBE_CHANGES turns the socket into a one-way event feed.
//! While a [`ChangeStream`] is alive a background task owns the read half,
//! decodes CHANGE_EVENT frames and forwards them over a channel; the stream
//! holds the connection exclusively so no request can interleave with the
//! feed. Stopping the stream cancels the task, takes the read half back and
//! sends a best-effort UNSUBSCRIBE_CHANGES.

use crate::connection::Connection;
use crate::error::ClientError;
use crate::exchange::{classify, read_frame};
use bytes::BytesMut;
use nexadb_protocol::{decode_payload, ChangeEvent, Frame, MessageType, SubscribeParams};
use std::ops::DerefMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type EventResult = Result<ChangeEvent, ClientError>;

/// The read side of a connection, lent to the receive loop.
pub(crate) struct ReadSide {
    pub(crate) reader: OwnedReadHalf,
    pub(crate) buf: BytesMut,
    pub(crate) max_payload: u32,
}

/// A running receive loop.
pub(crate) struct Subscription {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<ReadSide>,
}

impl Subscription {
    fn spawn(
        side: ReadSide,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<EventResult>) {
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(receive_loop(side, tx, cancel.clone(), poll_interval));
        (Self { cancel, handle }, rx)
    }

    /// Asks the loop to exit at its next poll tick.
    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub(crate) fn abort(self) {
        self.cancel();
        self.handle.abort();
    }

    /// Cancels the loop and waits up to `join_timeout` for it to hand the
    /// read side back. `None` means the read side is lost.
    pub(crate) async fn shutdown(self, join_timeout: Duration) -> Option<ReadSide> {
        self.cancel();
        let abort = self.handle.abort_handle();

        match tokio::time::timeout(join_timeout, self.handle).await {
            Ok(Ok(side)) => Some(side),
            Ok(Err(e)) => {
                tracing::warn!("Change stream receiver failed: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Change stream receiver did not exit within {:?}, aborting",
                    join_timeout
                );
                abort.abort();
                None
            }
        }
    }
}

/// Decodes frames until cancelled, the consumer goes away, or a read or
/// decode fails. A failure is sent as the final item.
async fn receive_loop(
    mut side: ReadSide,
    tx: mpsc::UnboundedSender<EventResult>,
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
) -> ReadSide {
    tracing::debug!("Change stream receiver started");

    while !cancel.load(Ordering::Acquire) {
        let frame = match tokio::time::timeout(
            poll_interval,
            read_frame(&mut side.reader, &mut side.buf, side.max_payload),
        )
        .await
        {
            Err(_) => continue,
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                let _ = tx.send(Err(e));
                break;
            }
        };

        match event_from(&frame) {
            Ok(Some(event)) => {
                tracing::trace!(
                    operation = %event.operation_type,
                    collection = %event.namespace.collection,
                    "change event"
                );
                if tx.send(Ok(event)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }

    tracing::debug!("Change stream receiver stopped");
    side
}

/// Interprets a frame received on a subscribed connection.
fn event_from(frame: &Frame) -> Result<Option<ChangeEvent>, ClientError> {
    match frame.kind()? {
        MessageType::ChangeEvent => Ok(Some(decode_payload(&frame.payload)?)),
        MessageType::Success | MessageType::Pong => {
            tracing::debug!("Ignoring stray {} frame on change stream", frame.message_type);
            Ok(None)
        }
        _ => classify(frame).map(|_| None),
    }
}

/// An active watch.
///
/// `C` is whatever grants exclusive access to the connection: `&mut
/// Connection` from [`Connection::watch`] or a lock guard from
/// [`crate::Client::watch`].
///
/// Prefer [`ChangeStream::stop`]. Dropping the stream cancels the receiver
/// right away and leaves the rest of the shutdown to the next use of the
/// connection.
pub struct ChangeStream<C>
where
    C: DerefMut<Target = Connection>,
{
    conn: C,
    subscription: Option<Subscription>,
    events: mpsc::UnboundedReceiver<EventResult>,
}

impl<C> ChangeStream<C>
where
    C: DerefMut<Target = Connection>,
{
    /// Subscribes, then hands the read side to a new receive loop. A
    /// rejected subscription starts nothing.
    pub(crate) async fn start(mut conn: C, params: SubscribeParams) -> Result<Self, ClientError> {
        conn.exchange(MessageType::SubscribeChanges, &params).await?;
        tracing::debug!(
            "Subscribed to changes on {}",
            params.collection.as_deref().unwrap_or("all collections")
        );

        let reader = conn.reader.take().ok_or(ClientError::NotConnected)?;
        let side = ReadSide {
            reader,
            buf: std::mem::take(&mut conn.read_buf),
            max_payload: conn.config.max_payload_size,
        };
        let (subscription, events) = Subscription::spawn(side, conn.config.watch_poll_interval());

        Ok(Self {
            conn,
            subscription: Some(subscription),
            events,
        })
    }

    /// Waits for the next change event.
    ///
    /// A receive failure is returned once, after every event that arrived
    /// before it, and ends the stream. Returns `None` once the stream has
    /// ended.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, ClientError>> {
        self.subscription.as_ref()?;

        match self.events.recv().await {
            Some(Ok(event)) => Some(Ok(event)),
            Some(Err(e)) => {
                tracing::debug!("Change stream failed: {}", e);
                self.shutdown().await;
                Some(Err(e))
            }
            None => {
                self.shutdown().await;
                None
            }
        }
    }

    /// Returns whether the stream can still yield events.
    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Stops the watch and releases the connection.
    pub async fn stop(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.conn.end_subscription(subscription).await;
        }
    }
}

impl<C> Drop for ChangeStream<C>
where
    C: DerefMut<Target = Connection>,
{
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            self.conn.parked = Some(subscription);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{record, serve, test_config};
    use nexadb_protocol::{OperationType, Record, Value};
    use std::time::Instant;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (addr, server) = serve(|mut peer| async move {
            peer.accept_handshake().await;
            let params = peer.expect(MessageType::SubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;

            peer.event("insert", "a1").await;
            peer.event("update", "a1").await;
            peer.event("delete", "a1").await;

            peer.expect(MessageType::UnsubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;
            peer.expect(MessageType::Ping).await;
            peer.reply(MessageType::Pong, Record::new()).await;
            params
        })
        .await;

        let config = test_config(addr);
        let poll_interval = config.watch_poll_interval();
        let mut conn = Connection::new(config);
        conn.connect().await.unwrap();

        let mut stream = conn
            .watch(SubscribeParams::collection("orders"))
            .await
            .unwrap();
        assert!(stream.is_active());

        let mut ops = Vec::new();
        for _ in 0..3 {
            let event = stream.next().await.unwrap().unwrap();
            assert_eq!(event.namespace.collection, "orders");
            assert_eq!(event.document_id(), Some("a1"));
            ops.push(event.operation_type);
        }
        assert_eq!(
            ops,
            vec![
                OperationType::Insert,
                OperationType::Update,
                OperationType::Delete
            ]
        );

        // Nothing more was sent, so the stream keeps waiting.
        let more = tokio::time::timeout(poll_interval * 3, stream.next()).await;
        assert!(more.is_err());
        assert!(stream.is_active());
        stream.stop().await;

        // The connection is back in request/response mode.
        conn.ping().await.unwrap();

        let params = server.await.unwrap();
        assert_eq!(params["collection"], Value::from("orders"));
        assert_eq!(
            params["operations"],
            Value::Array(vec!["insert".into(), "update".into(), "delete".into()])
        );
    }

    #[tokio::test]
    async fn test_server_close_ends_stream_with_error() {
        let (addr, _server) = serve(|mut peer| async move {
            peer.accept_handshake().await;
            peer.expect(MessageType::SubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;
            peer.event("insert", "x").await;
        })
        .await;

        let mut conn = Connection::new(test_config(addr));
        conn.connect().await.unwrap();

        let mut stream = conn.watch(SubscribeParams::default()).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.operation_type, OperationType::Insert);

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(err.kind(), ErrorKind::Connection);

        // The loop has exited and the stream does not restart.
        assert!(!stream.is_active());
        assert!(stream.next().await.is_none());
        drop(stream);

        // The unsubscribe attempt hit the closed socket and was swallowed.
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_stop_swallows_unsubscribe_failure() {
        let (addr, server) = serve(|mut peer| async move {
            peer.accept_handshake().await;
            peer.expect(MessageType::SubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;
            peer.event("insert", "x").await;

            let next = peer.recv().await.map(|(kind, _)| kind);
            peer.reply(
                MessageType::Error,
                record(&[("error", "No active subscription".into())]),
            )
            .await;
            peer.hold().await;
            next
        })
        .await;

        let config = test_config(addr);
        let bound = config.watch_poll_interval() + config.watch_join_timeout();
        let mut conn = Connection::new(config);
        conn.connect().await.unwrap();

        let mut stream = conn.watch(SubscribeParams::default()).await.unwrap();
        stream.next().await.unwrap().unwrap();

        let started = Instant::now();
        stream.stop().await;
        assert!(started.elapsed() < bound);

        conn.disconnect().await;
        assert_eq!(server.await.unwrap(), Some(MessageType::UnsubscribeChanges));
    }

    #[tokio::test]
    async fn test_rejected_subscribe_starts_nothing() {
        let (addr, _server) = serve(|mut peer| async move {
            peer.accept_handshake().await;
            peer.expect(MessageType::SubscribeChanges).await;
            peer.reply(
                MessageType::Error,
                record(&[("error", "Change streams disabled".into())]),
            )
            .await;
            peer.expect(MessageType::Ping).await;
            peer.reply(MessageType::Pong, Record::new()).await;
            peer.hold().await;
        })
        .await;

        let mut conn = Connection::new(test_config(addr));
        conn.connect().await.unwrap();

        let err = conn.watch(SubscribeParams::default()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Remote);

        // The read side was never handed out.
        assert!(conn.reader.is_some());
        conn.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_frame_terminates_stream() {
        let (addr, _server) = serve(|mut peer| async move {
            peer.accept_handshake().await;
            peer.expect(MessageType::SubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;
            peer.event("insert", "x").await;
            peer.reply(
                MessageType::Error,
                record(&[("error", "Subscription dropped".into())]),
            )
            .await;
            peer.expect(MessageType::UnsubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;
            peer.hold().await;
        })
        .await;

        let mut conn = Connection::new(test_config(addr));
        conn.connect().await.unwrap();

        let mut stream = conn.watch(SubscribeParams::default()).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Remote);
        assert!(err.to_string().contains("Subscription dropped"));
        assert!(stream.next().await.is_none());
        drop(stream);

        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_stream_is_finished_by_next_request() {
        let (addr, server) = serve(|mut peer| async move {
            peer.accept_handshake().await;
            peer.expect(MessageType::SubscribeChanges).await;
            peer.reply(MessageType::Success, Record::new()).await;
            peer.event("insert", "x").await;

            peer.expect(MessageType::UnsubscribeChanges).await;
            // An event that was already in flight, then the reply.
            peer.event("update", "x").await;
            peer.reply(MessageType::Success, Record::new()).await;

            let (kind, _) = peer.recv().await.unwrap();
            peer.reply(MessageType::Pong, Record::new()).await;
            peer.hold().await;
            kind
        })
        .await;

        let mut conn = Connection::new(test_config(addr));
        conn.connect().await.unwrap();

        {
            let mut stream = conn.watch(SubscribeParams::default()).await.unwrap();
            stream.next().await.unwrap().unwrap();
        }
        assert!(conn.parked.is_some());

        let pong = conn.ping().await.unwrap();
        assert!(pong.is_empty());
        assert!(conn.parked.is_none());

        conn.disconnect().await;
        assert_eq!(server.await.unwrap(), MessageType::Ping);
    }

    #[test]
    fn test_event_from_frames() {
        use bytes::Bytes;
        use nexadb_protocol::encode_record;

        let payload = record(&[("operationType", "insert".into())]);
        let frame = Frame::new(
            MessageType::ChangeEvent,
            Bytes::from(encode_record(&payload).unwrap()),
        );
        let event = event_from(&frame).unwrap().unwrap();
        assert_eq!(event.operation_type, OperationType::Insert);

        let frame = Frame::new(MessageType::Success, Bytes::new());
        assert!(event_from(&frame).unwrap().is_none());

        let frame = Frame::new(MessageType::ChangeEvent, Bytes::new());
        assert_eq!(event_from(&frame).unwrap_err().kind(), ErrorKind::Decode);

        let frame = Frame::new(MessageType::NotFound, Bytes::new());
        assert!(event_from(&frame).unwrap_err().is_not_found());
    }
}
