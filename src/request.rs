//! Outbound requests and typed replies.
//!
//! A [`ManagementRequest`] describes one outbound request: its ids, its
//! payload and an optional close handler. [`RawRequest`] covers the common
//! case of an opaque payload.
//!
//! Responses are consumed by a [`ResponseHandler`]. When the caller simply
//! wants the decoded value, [`reply_channel`] pairs a [`ReplyHandler`] with a
//! [`ReplyFuture`] resolving to it, and [`ManagementChannel::call`] wires the
//! two into a single send.
//!
//! ```
//! use muxframe::{ManagementChannel, RawRequest, transport::MemoryTransport};
//!
//! # async fn demo() -> Result<(), muxframe::ChannelError> {
//! let (transport, _inbound) = MemoryTransport::channel(8);
//! let channel = ManagementChannel::new(transport);
//! let request = RawRequest::new(channel.next_request_id(), 1, &b"ping"[..]);
//! let reply = channel.call(&request, |input| Ok(input.read_block()?)).await?;
//! # drop(reply);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    channel::ManagementChannel,
    close::{CloseHandler, CloseReason},
    error::{ChannelError, HandlerError},
    handler::ResponseHandler,
    header::ResponseHeader,
    message::{MessageReader, MessageWriter},
};

/// One outbound request.
pub trait ManagementRequest: Send + Sync {
    /// Id the response will carry. Must be unique among pending requests.
    fn request_id(&self) -> u32;

    /// Batch this request belongs to. Defaults to `0`.
    fn batch_id(&self) -> u32 { 0 }

    /// Operation the peer should run.
    fn operation_id(&self) -> u8;

    /// Write the request payload. Nothing is written by default.
    ///
    /// # Errors
    ///
    /// A failure aborts the send; nothing reaches the peer.
    fn write_payload(
        &self,
        _channel: &ManagementChannel,
        _output: &mut MessageWriter,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Callback to run if the channel closes before the response arrives.
    ///
    /// Called at most once per send.
    fn close_handler(&self) -> Option<CloseHandler> { None }
}

/// Request carrying an opaque payload as a length-prefixed block.
pub struct RawRequest {
    request_id: u32,
    batch_id: u32,
    operation_id: u8,
    payload: Bytes,
    on_close: Mutex<Option<CloseHandler>>,
}

impl RawRequest {
    /// Create a request for `operation_id` carrying `payload`.
    #[must_use]
    pub fn new(request_id: u32, operation_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            batch_id: 0,
            operation_id,
            payload: payload.into(),
            on_close: Mutex::new(None),
        }
    }

    /// Place the request in `batch_id`.
    #[must_use]
    pub fn with_batch_id(mut self, batch_id: u32) -> Self {
        self.batch_id = batch_id;
        self
    }

    /// Run `handler` if the channel closes while this request is pending.
    #[must_use]
    pub fn on_close<F>(self, handler: F) -> Self
    where
        F: FnOnce(&CloseReason) + Send + Sync + 'static,
    {
        let handler: CloseHandler = Box::new(handler);
        Self {
            on_close: Mutex::new(Some(handler)),
            ..self
        }
    }

    /// The payload sent to the peer.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }
}

impl ManagementRequest for RawRequest {
    fn request_id(&self) -> u32 { self.request_id }

    fn batch_id(&self) -> u32 { self.batch_id }

    fn operation_id(&self) -> u8 { self.operation_id }

    fn write_payload(
        &self,
        _channel: &ManagementChannel,
        output: &mut MessageWriter,
    ) -> Result<(), HandlerError> {
        output.write_block(&self.payload)
    }

    fn close_handler(&self) -> Option<CloseHandler> {
        self.on_close
            .lock()
            .ok()
            .and_then(|mut handler| handler.take())
    }
}

impl fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRequest")
            .field("request_id", &self.request_id)
            .field("batch_id", &self.batch_id)
            .field("operation_id", &self.operation_id)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Why a [`ReplyFuture`] resolved without a value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    /// The peer answered with an error message.
    #[error("peer reported an error: {0}")]
    Remote(String),

    /// The response payload could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The pending request was dropped before a response arrived, usually
    /// because the channel closed.
    #[error("request dropped before a response arrived")]
    Dropped,
}

/// [`ResponseHandler`] decoding the payload with a closure and forwarding the
/// outcome to a [`ReplyFuture`].
///
/// The value is forwarded as soon as the closure returns, before the channel
/// checks the response end marker.
pub struct ReplyHandler<T, F> {
    decode: Option<F>,
    remote_error: Option<String>,
    tx: Option<oneshot::Sender<Result<T, ReplyError>>>,
}

impl<T, F> ReplyHandler<T, F> {
    fn deliver(&mut self, outcome: Result<T, ReplyError>) {
        if let Some(tx) = self.tx.take() {
            // The caller may have stopped waiting.
            let _ = tx.send(outcome);
        }
    }
}

impl<T, F> ResponseHandler for ReplyHandler<T, F>
where
    T: Send + 'static,
    F: FnOnce(&mut MessageReader) -> Result<T, HandlerError> + Send + Sync + 'static,
{
    fn bind_context(&mut self, header: &ResponseHeader, _channel: &ManagementChannel) {
        self.remote_error = header.error().map(str::to_owned);
    }

    fn read_payload(&mut self, input: &mut MessageReader) -> Result<(), HandlerError> {
        if let Some(message) = self.remote_error.take() {
            self.deliver(Err(ReplyError::Remote(message)));
            return Ok(());
        }
        let Some(decode) = self.decode.take() else {
            return Ok(());
        };
        match decode(input) {
            Ok(value) => {
                self.deliver(Ok(value));
                Ok(())
            }
            Err(error) => {
                self.deliver(Err(ReplyError::Decode(error.message().to_owned())));
                Err(error)
            }
        }
    }
}

impl<T, F> fmt::Debug for ReplyHandler<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandler")
            .field("waiting", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

/// Future resolving to the decoded response of one request.
#[derive(Debug)]
#[must_use = "a reply future does nothing unless awaited"]
pub struct ReplyFuture<T> {
    rx: oneshot::Receiver<Result<T, ReplyError>>,
}

impl<T> Future for ReplyFuture<T> {
    type Output = Result<T, ReplyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ReplyError::Dropped)))
    }
}

/// Pair a [`ReplyHandler`] decoding with `decode` and the future it feeds.
pub fn reply_channel<T, F>(decode: F) -> (ReplyHandler<T, F>, ReplyFuture<T>)
where
    F: FnOnce(&mut MessageReader) -> Result<T, HandlerError>,
{
    let (tx, rx) = oneshot::channel();
    (
        ReplyHandler {
            decode: Some(decode),
            remote_error: None,
            tx: Some(tx),
        },
        ReplyFuture { rx },
    )
}

impl ManagementChannel {
    /// Send `request` and return a future resolving to its decoded response.
    ///
    /// # Errors
    ///
    /// Fails as [`ManagementChannel::execute_request`] does. Once the request
    /// is sent, later failures surface through the returned future.
    pub async fn call<R, T, F>(&self, request: &R, decode: F) -> Result<ReplyFuture<T>, ChannelError>
    where
        R: ManagementRequest + ?Sized,
        T: Send + 'static,
        F: FnOnce(&mut MessageReader) -> Result<T, HandlerError> + Send + Sync + 'static,
    {
        let (handler, reply) = reply_channel(decode);
        self.execute_request(request, Box::new(handler)).await?;
        Ok(reply)
    }
}
