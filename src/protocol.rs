//! Wire constants for management channel frames.
//!
//! Every frame opens with [`SIGNATURE`] followed by a sequence of tagged
//! fields. Tags are checked as they are read so a misaligned stream is
//! detected at the first unexpected byte rather than at the end marker.

/// Highest protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Leading bytes of every frame.
pub const SIGNATURE: [u8; 4] = [0x7f, 0x80, 0x7f, 0x80];

/// Tag preceding the `u32` protocol version.
pub const VERSION_FIELD: u8 = 0x00;
/// Tag preceding the frame type discriminator.
pub const TYPE: u8 = 0x01;
/// Frame type discriminator for requests.
pub const TYPE_REQUEST: u8 = 0x02;
/// Frame type discriminator for responses.
pub const TYPE_RESPONSE: u8 = 0x03;

/// Tag preceding the `u32` request id.
pub const REQUEST_ID: u8 = 0x01;
/// Tag preceding the `u32` batch id.
pub const BATCH_ID: u8 = 0x02;
/// Tag preceding the `u8` operation id.
pub const OPERATION_ID: u8 = 0x03;
/// Terminates a request frame.
pub const REQUEST_END: u8 = 0x06;

/// Tag preceding the `u32` response id.
pub const RESPONSE_ID: u8 = 0x07;
/// Tag preceding the response outcome.
pub const RESPONSE_TYPE: u8 = 0x08;
/// Successful response; the payload follows the header.
pub const RESPONSE_BODY: u8 = 0x09;
/// Failed response; a length-prefixed UTF-8 message follows.
pub const RESPONSE_ERROR: u8 = 0x0a;
/// Terminates a response frame.
pub const RESPONSE_END: u8 = 0x0b;
