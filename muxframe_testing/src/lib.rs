//! Utilities for exercising [`muxframe`] channels in tests.
//!
//! Frame builders produce the exact bytes a peer would send, a recording
//! transport captures what a channel sends back, and [`Loopback`] connects
//! two serving channels in memory.
//!
//! ```rust
//! use muxframe_testing::{parse_response, request_frame};
//!
//! let frame = request_frame(1, 0, 7, b"");
//! assert_eq!(&frame[..4], &[0x7f, 0x80, 0x7f, 0x80]);
//! # let _ = parse_response;
//! ```

pub mod frames;
pub mod handlers;
pub mod logging;
pub mod loopback;
pub mod recording;

pub use frames::{
    ParsedResponse,
    error_response_frame,
    parse_response,
    request_frame,
    request_frame_without_end,
    response_frame,
};
pub use handlers::{ECHO, Echo, FAILING_PROCESS, FailingProcess, echo_table};
pub use logging::{LoggerHandle, logger};
pub use loopback::Loopback;
pub use recording::RecordingTransport;
