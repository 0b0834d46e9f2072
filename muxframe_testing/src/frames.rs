//! Builders and parsers for raw protocol frames.
//!
//! Builders produce what a well-behaved peer would put on the wire, so tests
//! can feed a channel directly with [`ManagementChannel::on_message`] and
//! inspect its answers with [`parse_response`].
//!
//! [`ManagementChannel::on_message`]: muxframe::ManagementChannel::on_message

use bytes::Bytes;
use muxframe::{
    FramingError,
    MessageReader,
    MessageWriter,
    ProtocolHeader,
    RequestHeader,
    ResponseHeader,
    protocol::{PROTOCOL_VERSION, REQUEST_END, RESPONSE_END, TYPE_REQUEST},
};

fn request(request_id: u32, batch_id: u32, operation_id: u8, payload: &[u8]) -> MessageWriter {
    let mut output = MessageWriter::new();
    RequestHeader::new(PROTOCOL_VERSION, request_id, batch_id, operation_id).write(&mut output);
    output.write_bytes(payload);
    output
}

/// Complete request frame whose payload is `payload` verbatim.
#[must_use]
pub fn request_frame(request_id: u32, batch_id: u32, operation_id: u8, payload: &[u8]) -> Bytes {
    let mut output = request(request_id, batch_id, operation_id, payload);
    output.write_u8(REQUEST_END);
    output.freeze()
}

/// Request frame missing its end marker.
#[must_use]
pub fn request_frame_without_end(
    request_id: u32,
    batch_id: u32,
    operation_id: u8,
    payload: &[u8],
) -> Bytes {
    request(request_id, batch_id, operation_id, payload).freeze()
}

/// Successful response frame carrying `payload` verbatim.
#[must_use]
pub fn response_frame(response_id: u32, payload: &[u8]) -> Bytes {
    let mut output = MessageWriter::new();
    ResponseHeader::new(PROTOCOL_VERSION, response_id, None).write(&mut output);
    output.write_bytes(payload);
    output.write_u8(RESPONSE_END);
    output.freeze()
}

/// Error response frame carrying `message`.
#[must_use]
pub fn error_response_frame(response_id: u32, message: &str) -> Bytes {
    let mut output = MessageWriter::new();
    ResponseHeader::new(PROTOCOL_VERSION, response_id, Some(message.to_owned()))
        .write(&mut output);
    output.write_u8(RESPONSE_END);
    output.freeze()
}

/// A response frame split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// The decoded header.
    pub header: ResponseHeader,
    /// Bytes between the header and the end marker.
    pub payload: Bytes,
    /// Whether the frame ended with the response end marker.
    pub terminated: bool,
}

/// Split a response frame sent by a channel.
///
/// # Errors
///
/// Returns the framing error if the header does not parse, or
/// [`FramingError::UnknownFrameType`] if the frame is a request.
pub fn parse_response(frame: Bytes) -> Result<ParsedResponse, FramingError> {
    let mut input = MessageReader::new(frame);
    let header = match ProtocolHeader::parse(&mut input)? {
        ProtocolHeader::Response(header) => header,
        ProtocolHeader::Request(_) => return Err(FramingError::UnknownFrameType(TYPE_REQUEST)),
    };
    let rest = input.read_bytes(input.remaining())?;
    let terminated = rest.last() == Some(&RESPONSE_END);
    let payload = if terminated {
        rest.slice(..rest.len() - 1)
    } else {
        rest
    };
    Ok(ParsedResponse {
        header,
        payload,
        terminated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_frames_parse_back() {
        let parsed = parse_response(error_response_frame(9, "nope")).expect("parses");
        assert_eq!(parsed.header.error(), Some("nope"));
        assert!(parsed.payload.is_empty());
        assert!(parsed.terminated);
    }

    #[test]
    fn requests_are_not_responses() {
        assert_eq!(
            parse_response(request_frame(1, 0, 1, b"")),
            Err(FramingError::UnknownFrameType(TYPE_REQUEST))
        );
    }
}
