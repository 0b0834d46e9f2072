//! The management channel: one logical connection multiplexing requests in
//! both directions.
//!
//! Every inbound message is either a request, dispatched through the
//! channel's [`RequestDispatcher`] and always answered with exactly one
//! response frame, or a response, delivered to the pending request it
//! answers via the [`ResponseCorrelator`]. Outbound requests are sent with
//! [`ManagementChannel::execute_request`].
//!
//! Exchanges are independent: [`ManagementChannel::serve`] runs each inbound
//! message on its own task, so a slow handler never blocks unrelated
//! requests or responses.

use std::{
    fmt,
    io,
    panic::AssertUnwindSafe,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use log::{error, warn};
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace};

use crate::{
    close::{CloseHandler, CloseHandlers, CloseKey, CloseReason},
    config::{ChannelBuilder, ChannelConfig},
    correlator::{PendingRequest, ResponseCorrelator},
    dispatcher::RequestDispatcher,
    error::ChannelError,
    handler::{OperationHandler, RequestHandler, ResponseHandler},
    header::{ProtocolHeader, RequestHeader, ResponseHeader},
    message::{MessageReader, MessageWriter},
    metrics::{self, Direction},
    panic::format_panic,
    protocol::REQUEST_END,
    request::ManagementRequest,
    transport::MessageTransport,
};

/// Handle to a management channel.
///
/// Cloning is cheap; every clone refers to the same channel.
#[derive(Clone)]
pub struct ManagementChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: ChannelConfig,
    transport: Arc<dyn MessageTransport>,
    dispatcher: RequestDispatcher,
    correlator: ResponseCorrelator,
    close_handlers: CloseHandlers,
    next_request_id: AtomicU32,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl ManagementChannel {
    /// Start configuring a channel.
    pub fn builder() -> ChannelBuilder { ChannelBuilder::new() }

    /// Create a channel with the default configuration sending through
    /// `transport`.
    #[must_use]
    pub fn new<T: MessageTransport>(transport: T) -> Self { ChannelBuilder::new().build(transport) }

    pub(crate) fn from_parts(config: ChannelConfig, transport: Arc<dyn MessageTransport>) -> Self {
        let dispatcher = RequestDispatcher::new(config.protocol_version());
        Self {
            inner: Arc::new(ChannelInner {
                config,
                transport,
                dispatcher,
                correlator: ResponseCorrelator::new(),
                close_handlers: CloseHandlers::default(),
                next_request_id: AtomicU32::new(1),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Channel name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str { self.inner.config.name() }

    /// Configuration the channel was built with.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig { &self.inner.config }

    /// Highest protocol version this side speaks.
    #[must_use]
    pub fn protocol_version(&self) -> u32 { self.inner.config.protocol_version() }

    /// Install the handler resolving inbound requests, returning the one it
    /// replaced. Requests that start afterwards see the new handler.
    pub fn set_operation_handler(
        &self,
        handler: Arc<dyn OperationHandler>,
    ) -> Option<Arc<dyn OperationHandler>> {
        debug!(channel = self.name(), handler = handler.name(), "installing operation handler");
        self.inner.dispatcher.registry().install(handler)
    }

    /// The handler currently resolving inbound requests.
    #[must_use]
    pub fn operation_handler(&self) -> Option<Arc<dyn OperationHandler>> {
        self.inner.dispatcher.registry().current()
    }

    /// Allocate a request id not yet handed out by this channel.
    ///
    /// Ids start at 1 and wrap after `u32::MAX`.
    pub fn next_request_id(&self) -> u32 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Ids of outbound requests still awaiting a response, ascending.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<u32> { self.inner.correlator.pending_ids() }

    /// Number of close handlers still armed.
    #[must_use]
    pub fn armed_close_handlers(&self) -> usize { self.inner.close_handlers.len() }

    /// Arm `handler` to run when the channel closes.
    ///
    /// If the channel is already closed the handler runs immediately with
    /// [`CloseReason::Local`].
    pub fn add_close_handler(&self, handler: CloseHandler) -> Option<CloseKey> {
        let key = self.inner.close_handlers.register(handler);
        if self.is_closed() {
            self.sweep_after_close();
            return None;
        }
        Some(key)
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Settle registrations that raced [`close`](Self::close).
    ///
    /// Anything armed or pending once the channel is closed was added after
    /// `close` swept the tables; it is fired with [`CloseReason::Local`] or
    /// dropped here instead.
    fn sweep_after_close(&self) {
        let fired = self.inner.close_handlers.fire(&CloseReason::Local);
        let dropped = self.inner.correlator.clear();
        if fired > 0 || dropped > 0 {
            debug!(
                channel = self.name(),
                close_handlers = fired,
                pending_dropped = dropped,
                "settled registrations made during close"
            );
        }
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.name().to_owned()));
        }
        Ok(())
    }

    /// Handle one complete inbound message.
    ///
    /// Requests are read, processed and answered; responses are handed to
    /// the pending request they answer. Whatever the outcome, the message is
    /// fully consumed.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the exchange early. Errors reading a
    /// request have already been reported to the peer when this returns;
    /// every error has already been logged.
    pub async fn on_message(&self, message: Bytes) -> Result<(), ChannelError> {
        self.ensure_open()?;
        trace!(channel = self.name(), len = message.len(), "handling incoming data");
        metrics::inc_frames(Direction::Inbound);

        let mut input = MessageReader::new(message);
        let result = match ProtocolHeader::parse(&mut input) {
            Ok(ProtocolHeader::Request(header)) => self.handle_request(header, input).await,
            Ok(ProtocolHeader::Response(header)) => {
                let result = self.handle_response(&header, &mut input);
                self.release_input(input);
                result
            }
            Err(error) => {
                self.release_input(input);
                Err(error.into())
            }
        };

        if let Err(error) = &result {
            self.record_error(error);
        }
        trace!(channel = self.name(), "done handling incoming data");
        result
    }

    fn release_input(&self, mut input: MessageReader) {
        let discarded = input.drain();
        if discarded > 0 {
            debug!(channel = self.name(), discarded, "discarded unread message bytes");
        }
    }

    fn record_error(&self, error: &ChannelError) {
        metrics::inc_errors(error.error_type());
        match error {
            ChannelError::Framing(_) => {
                warn!("malformed message: channel={}, error={error}", self.name());
            }
            ChannelError::UnmatchedResponse(id) => {
                warn!("no response handler for request {id}: channel={}", self.name());
            }
            other => debug!(channel = self.name(), error = %other, "exchange failed"),
        }
    }

    async fn handle_request(
        &self,
        header: RequestHeader,
        mut input: MessageReader,
    ) -> Result<(), ChannelError> {
        let read = self.inner.dispatcher.read_request(self, &header, &mut input);
        self.release_input(input);

        let (mut handler, error) = match read {
            Ok(handler) => (Some(handler), None),
            Err(error) => (None, Some(error)),
        };
        if let Some(handler) = handler.as_deref_mut() {
            self.inner.dispatcher.process(&header, handler).await;
        }
        self.write_response(&header, handler.as_deref_mut(), error.as_ref())
            .await;
        error.map_or(Ok(()), Err)
    }

    async fn write_response(
        &self,
        header: &RequestHeader,
        handler: Option<&mut (dyn RequestHandler + 'static)>,
        error: Option<&ChannelError>,
    ) {
        trace!(
            batch_id = header.batch_id(),
            request_id = header.request_id(),
            "writing response"
        );
        if self.is_closed() {
            debug!(
                channel = self.name(),
                request_id = header.request_id(),
                "channel closed before response could be written"
            );
            return;
        }
        let mut output = MessageWriter::new();
        self.inner
            .dispatcher
            .write_response(&mut output, header, handler, error);
        match self.inner.transport.send(output.freeze()).await {
            Ok(()) => {
                metrics::inc_frames(Direction::Outbound);
                trace!(request_id = header.request_id(), "finished writing response");
            }
            Err(e) => {
                metrics::inc_errors("io");
                warn!(
                    "failed to send response: channel={}, request_id={}, error={e}",
                    self.name(),
                    header.request_id()
                );
            }
        }
    }

    fn handle_response(
        &self,
        header: &ResponseHeader,
        input: &mut MessageReader,
    ) -> Result<(), ChannelError> {
        let result = self.inner.correlator.complete(self, header, input);
        if result.is_ok() {
            metrics::inc_correlated();
        }
        result
    }

    /// Send `request`, delivering its response to `handler` once it arrives.
    ///
    /// Returns once the request frame has been handed to the transport; the
    /// response is delivered later by [`on_message`](Self::on_message).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel is closed, running the
    /// request's close handler if it had one, and
    /// [`ChannelError::DuplicateRequest`] if a request with the same id is
    /// still pending; nothing is sent in either case. Returns
    /// [`ChannelError::Io`] if the payload cannot be written or the transport
    /// fails, after discarding the pending entry and its close handler.
    pub async fn execute_request<R>(
        &self,
        request: &R,
        handler: Box<dyn ResponseHandler>,
    ) -> Result<(), ChannelError>
    where
        R: ManagementRequest + ?Sized,
    {
        self.ensure_open()?;
        let request_id = request.request_id();
        let close_key = request
            .close_handler()
            .map(|close| self.inner.close_handlers.register(close));

        let pending = PendingRequest::new(request_id, handler, close_key);
        if let Err(rejected) = self.inner.correlator.register(pending) {
            let error = ChannelError::DuplicateRequest(rejected.request_id());
            rejected.into_pending().release();
            metrics::inc_errors(error.error_type());
            warn!("{error}: channel={}", self.name());
            return Err(error);
        }
        // `close` may have swept the tables between `ensure_open` and the
        // registrations above.
        if self.is_closed() {
            self.sweep_after_close();
            return Err(ChannelError::Closed(self.name().to_owned()));
        }

        let header = RequestHeader::new(
            self.protocol_version(),
            request_id,
            request.batch_id(),
            request.operation_id(),
        );
        match self.send_request(&header, request).await {
            Ok(()) => {
                trace!(request_id, "sent request");
                Ok(())
            }
            Err(error) => {
                if let Some(pending) = self.inner.correlator.cancel(request_id) {
                    pending.release();
                }
                metrics::inc_errors(error.error_type());
                debug!(channel = self.name(), request_id, %error, "failed to send request");
                Err(error.into_send_error())
            }
        }
    }

    async fn send_request<R>(&self, header: &RequestHeader, request: &R) -> Result<(), ChannelError>
    where
        R: ManagementRequest + ?Sized,
    {
        let mut output = MessageWriter::new();
        header.write(&mut output);
        request.write_payload(self, &mut output)?;
        output.write_u8(REQUEST_END);
        self.inner.transport.send(output.freeze()).await?;
        metrics::inc_frames(Direction::Outbound);
        Ok(())
    }

    /// Handle every message from `inbound` until it ends, fails, or the
    /// channel is closed.
    ///
    /// Each message runs on its own task, at most
    /// [`ChannelConfig::max_in_flight`] at a time. A panicking exchange is
    /// logged and does not affect the others. Once the loop stops, `inbound`
    /// is dropped, running exchanges are awaited and the channel is closed
    /// with the returned reason.
    pub async fn serve<S>(&self, inbound: S) -> CloseReason
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let tracker = TaskTracker::new();
        let permits = Arc::new(Semaphore::new(self.config().max_in_flight()));
        debug!(channel = self.name(), "serving inbound messages");

        let reason = {
            let mut inbound = pin!(inbound);
            loop {
                let next = tokio::select! {
                    () = self.inner.shutdown.cancelled() => break CloseReason::Local,
                    next = inbound.next() => next,
                };
                let message = match next {
                    None => break CloseReason::TransportClosed,
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!("inbound stream failed: channel={}, error={e}", self.name());
                        break CloseReason::TransportError(e.to_string());
                    }
                };
                let acquired = tokio::select! {
                    () = self.inner.shutdown.cancelled() => break CloseReason::Local,
                    acquired = Arc::clone(&permits).acquire_owned() => acquired,
                };
                let Ok(permit) = acquired else {
                    break CloseReason::Local;
                };
                let channel = self.clone();
                tracker.spawn(async move {
                    let _permit = permit;
                    channel.run_exchange(message).await;
                });
            }
        };

        tracker.close();
        tracker.wait().await;
        self.close(reason.clone());
        reason
    }

    async fn run_exchange(&self, message: Bytes) {
        let exchange = AssertUnwindSafe(self.on_message(message)).catch_unwind();
        if let Err(panic) = exchange.await {
            metrics::inc_errors("panic");
            let panic_msg = format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("exchange task panicked: channel={}, panic={panic_msg}", self.name());
            tracing::error!(channel = self.name(), panic = %panic_msg, "exchange task panicked");
        }
    }

    /// Close the channel.
    ///
    /// Armed close handlers run once with `reason`, pending requests are
    /// dropped without a response, the operation handler is removed and
    /// [`serve`](Self::serve) stops reading. Later operations fail with
    /// [`ChannelError::Closed`]. Returns false if the channel was already
    /// closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.shutdown.cancel();
        let fired = self.inner.close_handlers.fire(&reason);
        let dropped = self.inner.correlator.clear();
        self.inner.dispatcher.registry().clear();
        debug!(
            channel = self.name(),
            %reason,
            close_handlers = fired,
            pending_dropped = dropped,
            "channel closed"
        );
        true
    }
}

impl fmt::Debug for ManagementChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementChannel")
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ManagementChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.name())
    }
}
