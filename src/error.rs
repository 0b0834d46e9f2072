//! Error taxonomy for management channels.
//!
//! Errors fall into two groups. Framing, dispatch and handler failures that
//! occur while reading a request are reported to the peer, but only as the
//! error's display string; type and source chain stay local. Duplicate and
//! unmatched correlation failures never leave the process and are logged by
//! the channel.
//!
//! - [`FramingError`]: the byte stream does not match the frame layout.
//! - [`DispatchError`]: no handler could be resolved for a request.
//! - [`HandlerError`]: business logic or payload coding failed.
//! - [`ChannelError`]: top-level enum wrapping all of the above plus
//!   correlation, transport and lifecycle failures.

use std::{error::Error as StdError, io};

use thiserror::Error;

/// Wire-level violations of the frame layout.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The frame did not start with the protocol signature.
    #[error("invalid frame signature")]
    BadSignature,

    /// A field tag other than the expected one was read.
    #[error("unexpected field tag: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedField {
        /// Tag required at this position.
        expected: u8,
        /// Tag actually present.
        actual: u8,
    },

    /// The frame type discriminator is neither request nor response.
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// The response outcome is neither body nor error.
    #[error("unknown response type {0:#04x}")]
    UnknownResponseType(u8),

    /// The frame ended before a field was complete.
    #[error("truncated frame: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required by the field being read.
        needed: usize,
        /// Bytes left in the message.
        remaining: usize,
    },

    /// The byte after the payload was not the expected end marker.
    #[error("missing end marker {expected:#04x}, found {found:?}")]
    MissingEndMarker {
        /// End marker required for this frame kind.
        expected: u8,
        /// Byte found instead, or `None` at end of message.
        found: Option<u8>,
    },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

/// Failures resolving a request handler for an inbound request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No operation handler has been installed on the channel.
    #[error("no operation handler set")]
    NoOperationHandler,

    /// The installed operation handler does not know the operation id.
    #[error("no request handler found with id {operation_id} in operation handler {handler}")]
    UnknownOperation {
        /// Operation id carried by the request header.
        operation_id: u8,
        /// Name of the installed operation handler.
        handler: String,
    },
}

/// Errors raised while building an [`crate::OperationTable`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    /// A handler factory with the provided operation id was already
    /// registered.
    #[error("operation id {0} was already registered")]
    DuplicateOperation(u8),
}

/// Failure raised by a request or response handler.
///
/// Only the message is ever written to the peer.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    /// Create an error carrying only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error that keeps `source` for local diagnostics.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The message reported to the peer.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

impl From<FramingError> for HandlerError {
    fn from(error: FramingError) -> Self { Self::with_source(error.to_string(), error) }
}

impl From<io::Error> for HandlerError {
    fn from(error: io::Error) -> Self { Self::with_source(error.to_string(), error) }
}

impl From<bincode::error::DecodeError> for HandlerError {
    fn from(error: bincode::error::DecodeError) -> Self {
        Self::with_source(format!("failed to decode payload: {error}"), error)
    }
}

impl From<bincode::error::EncodeError> for HandlerError {
    fn from(error: bincode::error::EncodeError) -> Self {
        Self::with_source(format!("failed to encode payload: {error}"), error)
    }
}

/// Top-level error type for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The frame layout was violated.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// No handler could be resolved for a request.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A pending request with this id is already outstanding.
    #[error("response handler already registered for request {0}")]
    DuplicateRequest(u32),

    /// A response arrived for an id with no pending request.
    #[error("no response handler for request {0}")]
    UnmatchedResponse(u32),

    /// A handler failed while coding a payload.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The channel has been closed.
    #[error("channel {0} is closed")]
    Closed(String),
}

impl ChannelError {
    /// Returns the error category as a string for logging and metrics.
    ///
    /// One of `"framing"`, `"dispatch"`, `"duplicate_request"`,
    /// `"unmatched_response"`, `"handler"`, `"io"` or `"closed"`.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Dispatch(_) => "dispatch",
            Self::DuplicateRequest(_) => "duplicate_request",
            Self::UnmatchedResponse(_) => "unmatched_response",
            Self::Handler(_) => "handler",
            Self::Io(_) => "io",
            Self::Closed(_) => "closed",
        }
    }

    /// Map a failure while sending a request onto the error returned to the
    /// caller of [`crate::ManagementChannel::execute_request`].
    ///
    /// Transport and channel errors pass through; handler failures are
    /// reported as I/O errors.
    pub(crate) fn into_send_error(self) -> Self {
        match self {
            Self::Handler(error) => Self::Io(io::Error::other(error)),
            other => other,
        }
    }
}

impl From<ChannelError> for io::Error {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::Io(inner) => inner,
            ChannelError::Framing(_) => io::Error::new(io::ErrorKind::InvalidData, error),
            ChannelError::Closed(_) => io::Error::new(io::ErrorKind::NotConnected, error),
            other => io::Error::other(other),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use std::io;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ChannelError::from(FramingError::BadSignature), "framing")]
    #[case(ChannelError::from(DispatchError::NoOperationHandler), "dispatch")]
    #[case(ChannelError::DuplicateRequest(1), "duplicate_request")]
    #[case(ChannelError::UnmatchedResponse(1), "unmatched_response")]
    #[case(ChannelError::from(HandlerError::new("boom")), "handler")]
    #[case(ChannelError::from(io::Error::other("reset")), "io")]
    #[case(ChannelError::Closed("mgmt".into()), "closed")]
    fn error_type_labels(#[case] error: ChannelError, #[case] expected: &str) {
        assert_eq!(error.error_type(), expected);
    }

    #[test]
    fn transparent_variants_display_inner_message() {
        let inner = DispatchError::UnknownOperation {
            operation_id: 99,
            handler: "table".into(),
        };
        let expected = inner.to_string();
        assert_eq!(ChannelError::from(inner).to_string(), expected);
    }

    #[test]
    fn handler_failures_become_io_on_send() {
        let error = ChannelError::from(HandlerError::new("cannot encode")).into_send_error();
        assert!(matches!(error, ChannelError::Io(ref e) if e.to_string() == "cannot encode"));
    }

    #[test]
    fn closed_maps_to_not_connected() {
        let error: io::Error = ChannelError::Closed("mgmt".into()).into();
        assert_eq!(error.kind(), io::ErrorKind::NotConnected);
    }
}
