#![doc(html_root_url = "https://docs.rs/muxframe/latest")]
//! Public API for the `muxframe` library.
//!
//! `muxframe` multiplexes concurrent request/response exchanges over one
//! message-oriented connection. Either peer may send requests; each side
//! dispatches inbound requests to registered operation handlers and
//! correlates inbound responses with the requests it sent.
//!
//! Start with [`ManagementChannel`]: build one over a
//! [`transport::MessageTransport`], install an [`OperationHandler`] such as
//! an [`OperationTable`], then feed it inbound messages with
//! [`ManagementChannel::serve`] and send requests with
//! [`ManagementChannel::execute_request`] or [`ManagementChannel::call`].

pub mod channel;
pub mod close;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod header;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod transport;

pub use channel::ManagementChannel;
pub use close::{CloseHandler, CloseKey, CloseReason};
pub use config::{ChannelBuilder, ChannelConfig};
pub use error::{ChannelError, DispatchError, FramingError, HandlerError, Result, RouteError};
pub use handler::{OperationHandler, OperationTable, RequestHandler, ResponseHandler};
pub use header::{ProtocolHeader, RequestHeader, ResponseHeader};
pub use message::{Message, MessageReader, MessageWriter};
pub use metrics::{Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use request::{
    ManagementRequest,
    RawRequest,
    ReplyError,
    ReplyFuture,
    ReplyHandler,
    reply_channel,
};
