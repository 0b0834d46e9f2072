//! Request handlers shared by integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use muxframe::{HandlerError, MessageReader, MessageWriter, OperationTable, RequestHandler};

/// Operation id routed to [`Echo`] by [`echo_table`].
pub const ECHO: u8 = 1;
/// Operation id routed to [`FailingProcess`] by [`echo_table`].
pub const FAILING_PROCESS: u8 = 2;

/// Answers with the block it was sent.
#[derive(Debug, Default)]
pub struct Echo {
    payload: Bytes,
}

#[async_trait]
impl RequestHandler for Echo {
    fn read_payload(&mut self, input: &mut MessageReader) -> Result<(), HandlerError> {
        self.payload = input.read_block()?;
        Ok(())
    }

    async fn process(&mut self) -> Result<(), HandlerError> { Ok(()) }

    fn write_payload(&mut self, output: &mut MessageWriter) -> Result<(), HandlerError> {
        output.write_block(&self.payload)
    }
}

/// Reads a block, fails in `process` yet still writes a payload.
#[derive(Debug, Default)]
pub struct FailingProcess;

#[async_trait]
impl RequestHandler for FailingProcess {
    fn read_payload(&mut self, input: &mut MessageReader) -> Result<(), HandlerError> {
        input.read_block()?;
        Ok(())
    }

    async fn process(&mut self) -> Result<(), HandlerError> {
        Err(HandlerError::new("business logic failed"))
    }

    fn write_payload(&mut self, output: &mut MessageWriter) -> Result<(), HandlerError> {
        output.write_block(b"written anyway")
    }
}

/// Table named `"echo"` routing [`ECHO`] and [`FAILING_PROCESS`].
#[must_use]
pub fn echo_table() -> OperationTable {
    OperationTable::new("echo")
        .route(ECHO, Echo::default)
        .and_then(|table| table.route(FAILING_PROCESS, || FailingProcess))
        .unwrap_or_else(|_| unreachable!("operation ids are distinct"))
}
