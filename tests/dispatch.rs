//! Tests for answering inbound requests.
//!
//! Requests are fed straight into [`ManagementChannel::on_message`] and the
//! frames the channel sends back are captured by a [`RecordingTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use muxframe::{
    ChannelError,
    DispatchError,
    FramingError,
    HandlerError,
    ManagementChannel,
    MessageReader,
    MessageWriter,
    OperationTable,
    RequestHandler,
};
use muxframe_testing::{
    ECHO,
    FAILING_PROCESS,
    ParsedResponse,
    RecordingTransport,
    echo_table,
    parse_response,
    request_frame,
    request_frame_without_end,
};
use proptest::prelude::*;
use rstest::{fixture, rstest};

struct Harness {
    channel: ManagementChannel,
    transport: RecordingTransport,
}

impl Harness {
    fn responses(&self) -> Vec<ParsedResponse> {
        self.transport
            .take()
            .into_iter()
            .map(|frame| parse_response(frame).expect("channel sends well-formed responses"))
            .collect()
    }
}

#[fixture]
fn harness() -> Harness {
    let transport = RecordingTransport::new();
    let channel = ManagementChannel::builder()
        .operation_handler(Arc::new(echo_table()))
        .build(transport.clone());
    Harness { channel, transport }
}

fn block(payload: &[u8]) -> Vec<u8> {
    let mut output = MessageWriter::new();
    output.write_block(payload).expect("short block");
    output.freeze().to_vec()
}

#[rstest]
#[tokio::test]
async fn echo_request_gets_exactly_one_terminated_response(harness: Harness) {
    harness
        .channel
        .on_message(request_frame(7, 3, ECHO, &block(b"hello")))
        .await
        .expect("echo succeeds");

    let responses = harness.responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0];
    assert_eq!(response.header.response_id(), 7);
    assert!(response.header.is_success());
    assert!(response.terminated);
    let mut payload = MessageReader::new(response.payload.clone());
    assert_eq!(&payload.read_block().expect("block")[..], b"hello");
}

#[rstest]
#[tokio::test]
async fn unknown_operation_is_reported_to_the_peer(harness: Harness) {
    let error = harness
        .channel
        .on_message(request_frame(11, 0, 99, b""))
        .await
        .expect_err("operation 99 is not routed");

    let expected = DispatchError::UnknownOperation {
        operation_id: 99,
        handler: "echo".into(),
    };
    assert!(matches!(&error, ChannelError::Dispatch(e) if *e == expected));
    let responses = harness.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].header.error(), Some(expected.to_string().as_str()));
    assert!(responses[0].payload.is_empty());
    assert!(responses[0].terminated);
}

#[tokio::test]
async fn missing_operation_handler_is_reported_to_the_peer() {
    let transport = RecordingTransport::new();
    let channel = ManagementChannel::new(transport.clone());

    let error = channel
        .on_message(request_frame(1, 0, ECHO, &block(b"x")))
        .await
        .expect_err("nothing is installed");
    assert!(matches!(
        error,
        ChannelError::Dispatch(DispatchError::NoOperationHandler)
    ));

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    let response = parse_response(sent[0].clone()).expect("response parses");
    assert_eq!(response.header.error(), Some("no operation handler set"));
}

#[rstest]
#[tokio::test]
async fn missing_end_marker_is_reported_and_channel_stays_usable(harness: Harness) {
    let error = harness
        .channel
        .on_message(request_frame_without_end(2, 0, ECHO, &block(b"cut")))
        .await
        .expect_err("request is missing its end marker");
    assert!(matches!(
        error,
        ChannelError::Framing(FramingError::MissingEndMarker { found: None, .. })
    ));

    harness
        .channel
        .on_message(request_frame(3, 0, ECHO, &block(b"next")))
        .await
        .expect("following request is handled");

    let responses = harness.responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].header.response_id(), 2);
    assert_eq!(responses[0].header.error(), Some(error.to_string().as_str()));
    assert_eq!(responses[1].header.response_id(), 3);
    assert!(responses[1].header.is_success());
}

#[rstest]
#[tokio::test]
async fn trailing_bytes_after_payload_are_a_framing_error(harness: Harness) {
    let mut payload = block(b"ok");
    payload.push(0xff);
    harness
        .channel
        .on_message(request_frame(4, 0, ECHO, &payload))
        .await
        .expect_err("0xff is not the end marker");

    let responses = harness.responses();
    assert_eq!(responses.len(), 1);
    assert!(!responses[0].header.is_success());
}

#[rstest]
#[tokio::test]
async fn process_failure_is_not_visible_to_the_peer(harness: Harness) {
    harness
        .channel
        .on_message(request_frame(5, 0, FAILING_PROCESS, &block(b"")))
        .await
        .expect("process failures are local");

    let responses = harness.responses();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].header.is_success());
    let mut payload = MessageReader::new(responses[0].payload.clone());
    assert_eq!(&payload.read_block().expect("block")[..], b"written anyway");
}

#[rstest]
#[tokio::test]
async fn garbage_is_dropped_without_a_response(harness: Harness) {
    let error = harness
        .channel
        .on_message(Bytes::from_static(b"not a frame"))
        .await
        .expect_err("signature is wrong");
    assert!(matches!(error, ChannelError::Framing(FramingError::BadSignature)));
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn response_version_is_the_lower_of_both_sides() {
    let transport = RecordingTransport::new();
    let channel = ManagementChannel::builder()
        .protocol_version(2)
        .operation_handler(Arc::new(echo_table()))
        .build(transport.clone());

    let mut frame = request_frame(6, 0, ECHO, &block(b"")).to_vec();
    // The version follows the signature and its field tag.
    frame[5..9].copy_from_slice(&5u32.to_be_bytes());
    channel
        .on_message(Bytes::from(frame))
        .await
        .expect("request succeeds");

    let response = parse_response(transport.take().remove(0)).expect("response parses");
    assert_eq!(response.header.version(), 2);
}

/// Phase in which a [`Configured`] handler fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Read,
    Process,
    Write,
}

struct Configured {
    fail_in: Option<Phase>,
    message: String,
}

impl Configured {
    fn check(&self, phase: Phase) -> Result<(), HandlerError> {
        if self.fail_in == Some(phase) {
            return Err(HandlerError::new(self.message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestHandler for Configured {
    fn read_payload(&mut self, _input: &mut MessageReader) -> Result<(), HandlerError> {
        self.check(Phase::Read)
    }

    async fn process(&mut self) -> Result<(), HandlerError> { self.check(Phase::Process) }

    fn write_payload(&mut self, output: &mut MessageWriter) -> Result<(), HandlerError> {
        output.write_u8(0x2a);
        self.check(Phase::Write)
    }
}

fn phase() -> impl Strategy<Value = Option<Phase>> {
    prop_oneof![
        Just(None),
        Just(Some(Phase::Read)),
        Just(Some(Phase::Process)),
        Just(Some(Phase::Write)),
    ]
}

proptest! {
    /// Failures while reading a request or writing its payload reach the
    /// peer as the response's error; failures while processing never do.
    #[test]
    fn only_read_and_write_failures_reach_the_peer(
        fail_in in phase(),
        message in "[a-z ]{1,40}",
        request_id in any::<u32>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let transport = RecordingTransport::new();
        let factory_message = message.clone();
        let table = OperationTable::new("configured")
            .route(1, move || Configured { fail_in, message: factory_message.clone() })
            .expect("route 1");
        let channel = ManagementChannel::builder()
            .operation_handler(Arc::new(table))
            .build(transport.clone());

        let _ = runtime.block_on(channel.on_message(request_frame(request_id, 0, 1, b"")));

        let sent = transport.take();
        prop_assert_eq!(sent.len(), 1);
        let response = parse_response(sent[0].clone()).expect("response parses");
        prop_assert_eq!(response.header.response_id(), request_id);
        prop_assert!(response.terminated);
        match fail_in {
            Some(Phase::Read | Phase::Write) => {
                prop_assert_eq!(response.header.error(), Some(message.as_str()));
                prop_assert!(response.payload.is_empty());
            }
            None | Some(Phase::Process) => {
                prop_assert!(response.header.is_success());
                prop_assert_eq!(&response.payload[..], &[0x2a][..]);
            }
        }
    }
}
