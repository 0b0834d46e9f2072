//! Server-side handling of inbound requests.
//!
//! The dispatcher resolves a handler for each request from the channel's
//! [`OperationRegistry`], lets it decode the payload and run, and always
//! produces a response frame, even when nothing else about the request
//! worked. Failures resolving or reading a request reach the peer as the
//! response's error message. Failures in [`RequestHandler::process`] are
//! only logged.
//!
//! A handler that panics is treated like one that returned an error in the
//! same phase, so a panic never costs the peer its response.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
};

use futures::FutureExt;
use log::{error, warn};
use tracing::{debug, trace};

use crate::{
    channel::ManagementChannel,
    error::{ChannelError, DispatchError, HandlerError},
    handler::RequestHandler,
    header::{RequestHeader, ResponseHeader},
    message::{MessageReader, MessageWriter},
    metrics,
    panic::format_panic,
    protocol::{REQUEST_END, RESPONSE_END},
    registry::OperationRegistry,
};

/// Resolves, runs and answers inbound requests.
#[derive(Debug)]
pub struct RequestDispatcher {
    registry: OperationRegistry,
    local_version: u32,
}

impl RequestDispatcher {
    /// Create a dispatcher answering with at most `local_version`.
    #[must_use]
    pub fn new(local_version: u32) -> Self {
        Self {
            registry: OperationRegistry::new(),
            local_version,
        }
    }

    /// Registry consulted for every request.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry { &self.registry }

    /// Build a fresh handler for `operation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoOperationHandler`] if nothing is installed
    /// and [`DispatchError::UnknownOperation`] if the installed handler does
    /// not know `operation_id`.
    pub fn resolve_handler(&self, operation_id: u8) -> Result<Box<dyn RequestHandler>, DispatchError> {
        let operations = self
            .registry
            .current()
            .ok_or(DispatchError::NoOperationHandler)?;
        operations
            .request_handler(operation_id)
            .ok_or_else(|| DispatchError::UnknownOperation {
                operation_id,
                handler: operations.name().to_owned(),
            })
    }

    /// Resolve a handler and let it decode the request payload.
    ///
    /// # Errors
    ///
    /// Returns the dispatch or handler error that stopped the read, or
    /// [`crate::FramingError::MissingEndMarker`] if the payload is not
    /// followed by the request end marker.
    pub fn read_request(
        &self,
        channel: &ManagementChannel,
        header: &RequestHeader,
        input: &mut MessageReader,
    ) -> Result<Box<dyn RequestHandler>, ChannelError> {
        trace!(
            channel = channel.name(),
            batch_id = header.batch_id(),
            request_id = header.request_id(),
            "reading request"
        );
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.resolve_and_read(channel, header, input)
        }))
        .unwrap_or_else(|panic| Err(handler_panicked(header, "read_payload", panic).into()));
        match &result {
            Ok(_) => trace!(request_id = header.request_id(), "finished reading request"),
            Err(error) => debug!(
                request_id = header.request_id(),
                %error,
                "finished reading request with error"
            ),
        }
        result
    }

    fn resolve_and_read(
        &self,
        channel: &ManagementChannel,
        header: &RequestHeader,
        input: &mut MessageReader,
    ) -> Result<Box<dyn RequestHandler>, ChannelError> {
        let mut handler = self.resolve_handler(header.operation_id())?;
        handler.bind_context(channel, header);
        handler.read_payload(input)?;
        input.expect_end(REQUEST_END)?;
        Ok(handler)
    }

    /// Run the handler's business logic.
    ///
    /// A failure or panic is logged and counted here and goes no further.
    pub async fn process(&self, header: &RequestHeader, handler: &mut dyn RequestHandler) {
        trace!(request_id = header.request_id(), "processing request");
        metrics::inc_dispatched();
        let outcome = AssertUnwindSafe(handler.process())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(handler_panicked(header, "process", panic)));
        match outcome {
            Ok(()) => trace!(request_id = header.request_id(), "finished processing request"),
            Err(error) => {
                metrics::inc_errors("process");
                warn!(
                    "request processing failed: request_id={}, batch_id={}, error={error}",
                    header.request_id(),
                    header.batch_id()
                );
            }
        }
    }

    /// Write the response frame for `header` into `output`.
    ///
    /// The frame carries `error`'s message if there is one, otherwise the
    /// handler's payload. If the handler fails part way through its payload,
    /// everything written for this frame is discarded and an error frame
    /// reporting that failure is written instead.
    pub fn write_response(
        &self,
        output: &mut MessageWriter,
        header: &RequestHeader,
        handler: Option<&mut (dyn RequestHandler + 'static)>,
        error: Option<&ChannelError>,
    ) {
        let start = output.len();
        ResponseHeader::for_request(header, self.local_version, error).write(output);
        if error.is_none()
            && let Some(handler) = handler
            && let Err(failure) = catch_unwind(AssertUnwindSafe(|| handler.write_payload(output)))
                .unwrap_or_else(|panic| Err(handler_panicked(header, "write_payload", panic)))
        {
            warn!(
                "failed to write response payload: request_id={}, error={failure}",
                header.request_id()
            );
            metrics::inc_errors("handler");
            output.truncate(start);
            let failure = ChannelError::Handler(failure);
            ResponseHeader::for_request(header, self.local_version, Some(&failure)).write(output);
        }
        output.write_u8(RESPONSE_END);
    }
}

/// Log a handler panic and turn it into the error the phase would report.
fn handler_panicked(
    header: &RequestHeader,
    phase: &str,
    panic: Box<dyn Any + Send>,
) -> HandlerError {
    let panic_msg = format_panic(panic);
    metrics::inc_errors("panic");
    // Emit via both `log` and `tracing` for tests that capture either.
    error!(
        "request handler panicked: request_id={}, phase={phase}, panic={panic_msg}",
        header.request_id()
    );
    tracing::error!(
        request_id = header.request_id(),
        phase,
        panic = %panic_msg,
        "request handler panicked"
    );
    HandlerError::new(format!("request handler panicked: {panic_msg}"))
}
