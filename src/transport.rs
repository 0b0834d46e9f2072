//! Message transports carrying whole frames between peers.
//!
//! The channel only needs two things from a transport: a way to send one
//! complete outbound message, and a stream of complete inbound messages.
//! [`MessageTransport`] covers the first; any
//! `Stream<Item = io::Result<Bytes>>` handed to
//! [`ManagementChannel::serve`](crate::ManagementChannel::serve) covers the
//! second.
//!
//! Two implementations are provided: [`MemoryTransport`] connects two
//! channels in one process, and [`FramedTransport`] writes length-delimited
//! messages to any [`AsyncWrite`], with [`framed_messages`] reading them
//! back.

use std::{
    fmt,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, mpsc},
};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Outbound half of a message-oriented connection.
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// Deliver one complete message to the peer.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the message cannot be delivered.
    async fn send(&self, message: Bytes) -> io::Result<()>;
}

/// Transport delivering messages to an in-process peer.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    tx: mpsc::Sender<Bytes>,
}

impl MemoryTransport {
    /// Create a transport and the inbound stream receiving what it sends.
    ///
    /// `capacity` bounds the number of queued messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, MemoryInbound) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, MemoryInbound { rx })
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn send(&self, message: Bytes) -> io::Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer inbound queue closed"))
    }
}

/// Inbound stream fed by a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryInbound {
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryInbound {
    /// Stop accepting further messages; queued ones are still yielded.
    pub fn close(&mut self) { self.rx.close(); }
}

impl Stream for MemoryInbound {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|message| message.map(Ok))
    }
}

/// One side of an in-process connection.
#[derive(Debug)]
pub struct MemoryEndpoint {
    /// Sends to the other side.
    pub transport: MemoryTransport,
    /// Receives what the other side sends.
    pub inbound: MemoryInbound,
}

/// Create two connected in-process endpoints.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn memory_pair(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    let (to_right, right_inbound) = MemoryTransport::channel(capacity);
    let (to_left, left_inbound) = MemoryTransport::channel(capacity);
    (
        MemoryEndpoint {
            transport: to_right,
            inbound: left_inbound,
        },
        MemoryEndpoint {
            transport: to_left,
            inbound: right_inbound,
        },
    )
}

/// Transport writing length-delimited messages to a byte stream.
pub struct FramedTransport<W> {
    sink: Mutex<FramedWrite<W, LengthDelimitedCodec>>,
}

impl<W> FramedTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Frame messages onto `writer` with a 4-byte big-endian length prefix.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            sink: Mutex::new(FramedWrite::new(writer, LengthDelimitedCodec::new())),
        }
    }
}

#[async_trait]
impl<W> MessageTransport for FramedTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, message: Bytes) -> io::Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await
    }
}

impl<W> fmt::Debug for FramedTransport<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedTransport").finish_non_exhaustive()
    }
}

/// Read length-delimited messages written by a [`FramedTransport`].
pub fn framed_messages<R>(reader: R) -> impl Stream<Item = io::Result<Bytes>> + Send + Unpin
where
    R: AsyncRead + Unpin + Send,
{
    FramedRead::new(reader, LengthDelimitedCodec::new())
        .map(|frame: io::Result<BytesMut>| frame.map(BytesMut::freeze))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn memory_pair_delivers_to_the_other_side() {
        let (mut left, mut right) = memory_pair(4);
        left.transport
            .send(Bytes::from_static(b"ping"))
            .await
            .expect("send ping");
        right
            .transport
            .send(Bytes::from_static(b"pong"))
            .await
            .expect("send pong");

        let at_right = right.inbound.next().await.expect("message").expect("ok");
        let at_left = left.inbound.next().await.expect("message").expect("ok");
        assert_eq!(&at_right[..], b"ping");
        assert_eq!(&at_left[..], b"pong");
    }

    #[tokio::test]
    async fn send_fails_once_inbound_is_gone() {
        let (transport, inbound) = MemoryTransport::channel(1);
        drop(inbound);
        let error = transport
            .send(Bytes::from_static(b"lost"))
            .await
            .expect_err("send should fail");
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn framed_transport_preserves_message_boundaries() {
        let (client, server) = tokio::io::duplex(256);
        let transport = FramedTransport::new(client);
        transport
            .send(Bytes::from_static(b"first"))
            .await
            .expect("send first");
        transport
            .send(Bytes::from_static(b"second"))
            .await
            .expect("send second");
        drop(transport);

        let messages: Vec<Bytes> = framed_messages(server)
            .map(|m| m.expect("frame should decode"))
            .collect()
            .await;
        assert_eq!(messages, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
    }
}
