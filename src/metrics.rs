//! Metric helpers for `muxframe`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking frames sent and received.
pub const FRAMES_PROCESSED: &str = "muxframe_frames_processed_total";
/// Name of the counter tracking requests handed to a request handler.
pub const REQUESTS_DISPATCHED: &str = "muxframe_requests_dispatched_total";
/// Name of the counter tracking responses matched to a pending request.
pub const RESPONSES_CORRELATED: &str = "muxframe_responses_correlated_total";
/// Name of the counter tracking error occurrences by kind.
pub const ERRORS_TOTAL: &str = "muxframe_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from the peer.
    Inbound,
    /// Frames sent to the peer.
    Outbound,
}

impl Direction {
    /// Label value used for this direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record a frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a request handed to its handler.
pub fn inc_dispatched() {
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_DISPATCHED).increment(1);
}

/// Record a response matched to its pending request.
pub fn inc_correlated() {
    #[cfg(feature = "metrics")]
    counter!(RESPONSES_CORRELATED).increment(1);
}

/// Record an error of the given kind.
///
/// `kind` is normally [`crate::ChannelError::error_type`], or `"process"` for
/// failures in business logic.
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}
