//! Handler contracts for both halves of an exchange.
//!
//! A [`RequestHandler`] serves one inbound request and a [`ResponseHandler`]
//! consumes one inbound response. Neither is reused: the
//! [`OperationHandler`] installed on a channel builds a fresh request handler
//! for every request, and callers of
//! [`ManagementChannel::execute_request`](crate::ManagementChannel::execute_request)
//! supply a fresh response handler per request.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    channel::ManagementChannel,
    error::{HandlerError, RouteError},
    header::{RequestHeader, ResponseHeader},
    message::{MessageReader, MessageWriter},
};

/// Server-side handler for a single request.
///
/// The dispatcher calls the methods in order: [`bind_context`], then
/// [`read_payload`], then [`process`] if the payload was read, and finally
/// [`write_payload`] if nothing failed before it.
///
/// [`bind_context`]: RequestHandler::bind_context
/// [`read_payload`]: RequestHandler::read_payload
/// [`process`]: RequestHandler::process
/// [`write_payload`]: RequestHandler::write_payload
#[async_trait]
pub trait RequestHandler: Send {
    /// Receive the channel and header of the exchange.
    fn bind_context(&mut self, _channel: &ManagementChannel, _header: &RequestHeader) {}

    /// Decode the request payload.
    ///
    /// # Errors
    ///
    /// A failure here is reported to the peer in the response header.
    fn read_payload(&mut self, _input: &mut MessageReader) -> Result<(), HandlerError> { Ok(()) }

    /// Run the operation.
    ///
    /// # Errors
    ///
    /// Failures are logged by the channel; they are not reported to the peer.
    async fn process(&mut self) -> Result<(), HandlerError>;

    /// Encode the response payload.
    ///
    /// # Errors
    ///
    /// A failure replaces the response with an error frame.
    fn write_payload(&mut self, _output: &mut MessageWriter) -> Result<(), HandlerError> { Ok(()) }
}

/// Client-side handler for the response to one outbound request.
pub trait ResponseHandler: Send + Sync {
    /// Receive the header and channel of the exchange.
    ///
    /// The header carries the responder's error message, if any.
    fn bind_context(&mut self, _header: &ResponseHeader, _channel: &ManagementChannel) {}

    /// Decode the response payload.
    ///
    /// # Errors
    ///
    /// Failures are returned to the task that delivered the response.
    fn read_payload(&mut self, input: &mut MessageReader) -> Result<(), HandlerError>;
}

/// Factory of request handlers installed on a channel.
pub trait OperationHandler: Send + Sync + 'static {
    /// Build a fresh handler for `operation_id`, or `None` if unknown.
    fn request_handler(&self, operation_id: u8) -> Option<Box<dyn RequestHandler>>;

    /// Name used in dispatch error messages.
    fn name(&self) -> &str { std::any::type_name::<Self>() }
}

/// Constructor for a request handler.
pub type HandlerFactory = Arc<dyn Fn() -> Box<dyn RequestHandler> + Send + Sync>;

/// [`OperationHandler`] backed by a map of operation ids to factories.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use muxframe::{HandlerError, OperationHandler, OperationTable, RequestHandler};
///
/// struct Ping;
///
/// #[async_trait]
/// impl RequestHandler for Ping {
///     async fn process(&mut self) -> Result<(), HandlerError> { Ok(()) }
/// }
///
/// let table = OperationTable::new("ping")
///     .route(1, || Ping)
///     .expect("operation 1 is free");
/// assert!(table.request_handler(1).is_some());
/// assert!(table.request_handler(2).is_none());
/// ```
#[derive(Clone)]
pub struct OperationTable {
    name: String,
    routes: HashMap<u8, HandlerFactory>,
}

impl OperationTable {
    /// Create an empty table named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: HashMap::new(),
        }
    }

    /// Register `factory` for `operation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::DuplicateOperation`] if `operation_id` already
    /// has a factory.
    pub fn route<F, H>(mut self, operation_id: u8, factory: F) -> Result<Self, RouteError>
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        if self.routes.contains_key(&operation_id) {
            return Err(RouteError::DuplicateOperation(operation_id));
        }
        let boxed: HandlerFactory = Arc::new(move || Box::new(factory()) as Box<dyn RequestHandler>);
        self.routes.insert(operation_id, boxed);
        Ok(self)
    }

    /// Registered operation ids in ascending order.
    #[must_use]
    pub fn operation_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.routes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl OperationHandler for OperationTable {
    fn request_handler(&self, operation_id: u8) -> Option<Box<dyn RequestHandler>> {
        self.routes.get(&operation_id).map(|factory| factory())
    }

    fn name(&self) -> &str { &self.name }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTable")
            .field("name", &self.name)
            .field("operations", &self.operation_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Noop;

    #[async_trait]
    impl RequestHandler for Noop {
        async fn process(&mut self) -> Result<(), HandlerError> { Ok(()) }
    }

    #[test]
    fn duplicate_operation_is_rejected() {
        let result = OperationTable::new("dup")
            .route(3, || Noop)
            .and_then(|table| table.route(3, || Noop));
        assert_eq!(result.err(), Some(RouteError::DuplicateOperation(3)));
    }

    #[test]
    fn every_lookup_builds_a_fresh_handler() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let table = OperationTable::new("fresh")
            .route(1, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Noop
            })
            .expect("route 1");

        assert!(table.request_handler(1).is_some());
        assert!(table.request_handler(1).is_some());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn operation_ids_are_sorted() {
        let table = OperationTable::new("ids")
            .route(9, || Noop)
            .and_then(|t| t.route(2, || Noop))
            .expect("routes");
        assert_eq!(table.operation_ids(), vec![2, 9]);
        assert_eq!(table.name(), "ids");
    }
}
