//! Unit tests for frame header parsing and serialization.

use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;

use super::*;
use crate::{
    error::{ChannelError, DispatchError},
    protocol::REQUEST_END,
};

fn encode(header: &ProtocolHeader) -> Bytes {
    let mut output = MessageWriter::new();
    header.write(&mut output);
    output.freeze()
}

fn parse(bytes: Bytes) -> Result<ProtocolHeader, FramingError> {
    ProtocolHeader::parse(&mut MessageReader::new(bytes))
}

#[test]
fn request_header_layout() {
    let bytes = encode(&RequestHeader::new(1, 7, 3, 42).into());
    assert_eq!(
        &bytes[..],
        &[
            0x7f, 0x80, 0x7f, 0x80, // signature
            0x00, 0, 0, 0, 1, // version
            0x01, 0x02, // request
            0x01, 0, 0, 0, 7, // request id
            0x02, 0, 0, 0, 3, // batch id
            0x03, 42, // operation id
        ]
    );
}

#[test]
fn error_response_layout() {
    let bytes = encode(&ResponseHeader::new(1, 9, Some("no".into())).into());
    assert_eq!(
        &bytes[10..],
        &[0x03, 0x07, 0, 0, 0, 9, 0x08, 0x0a, 0, 2, b'n', b'o']
    );
}

#[test]
fn parse_leaves_payload_in_place() {
    let mut output = MessageWriter::new();
    RequestHeader::new(1, 1, 1, 1).write(&mut output);
    output.write_bytes(b"body");
    output.write_u8(REQUEST_END);

    let mut input = MessageReader::new(output.freeze());
    let header = ProtocolHeader::parse(&mut input).expect("header should parse");
    assert!(header.is_request());
    assert_eq!(&input.read_bytes(4).expect("payload")[..], b"body");
    assert_eq!(input.expect_end(REQUEST_END), Ok(()));
}

#[rstest]
#[case::bad_signature(vec![0x7f, 0x80, 0x7f, 0x81], FramingError::BadSignature)]
#[case::unknown_type(
    vec![0x7f, 0x80, 0x7f, 0x80, 0x00, 0, 0, 0, 1, 0x01, 0x05],
    FramingError::UnknownFrameType(0x05)
)]
#[case::wrong_tag(
    vec![0x7f, 0x80, 0x7f, 0x80, 0x01],
    FramingError::UnexpectedField { expected: 0x00, actual: 0x01 }
)]
#[case::truncated(
    vec![0x7f, 0x80, 0x7f, 0x80, 0x00, 0, 0],
    FramingError::Truncated { needed: 4, remaining: 2 }
)]
#[case::unknown_response_type(
    vec![0x7f, 0x80, 0x7f, 0x80, 0x00, 0, 0, 0, 1, 0x01, 0x03, 0x07, 0, 0, 0, 1, 0x08, 0x0c],
    FramingError::UnknownResponseType(0x0c)
)]
fn malformed_headers_are_rejected(#[case] bytes: Vec<u8>, #[case] expected: FramingError) {
    assert_eq!(parse(Bytes::from(bytes)), Err(expected));
}

#[rstest]
#[case(1, 1, 1)]
#[case(1, 3, 1)]
#[case(4, 2, 2)]
fn response_version_is_negotiated_by_responder(
    #[case] local: u32,
    #[case] peer: u32,
    #[case] expected: u32,
) {
    let request = RequestHeader::new(peer, 5, 0, 1);
    let response = ResponseHeader::for_request(&request, local, None);
    assert_eq!(response.version(), expected);
    assert_eq!(response.response_id(), 5);
    assert!(response.is_success());
}

#[test]
fn response_error_keeps_only_the_message() {
    let request = RequestHeader::new(1, 5, 0, 1);
    let error = ChannelError::from(DispatchError::NoOperationHandler);
    let response = ResponseHeader::for_request(&request, 1, Some(&error));
    assert_eq!(response.error(), Some("no operation handler set"));
}

proptest! {
    #[test]
    fn request_header_round_trips(
        version in any::<u32>(),
        request_id in any::<u32>(),
        batch_id in any::<u32>(),
        operation_id in any::<u8>(),
    ) {
        let header = RequestHeader::new(version, request_id, batch_id, operation_id);
        let decoded = parse(encode(&header.into())).expect("request header should parse");
        prop_assert_eq!(decoded, ProtocolHeader::Request(header));
    }

    #[test]
    fn response_header_round_trips(
        version in any::<u32>(),
        response_id in any::<u32>(),
        error in proptest::option::of(".{0,64}"),
    ) {
        let header = ResponseHeader::new(version, response_id, error);
        let decoded = parse(encode(&header.clone().into())).expect("response header should parse");
        prop_assert_eq!(decoded, ProtocolHeader::Response(header));
    }
}
