//! Two management channels talking over a local TCP connection.
//!
//! The server side answers a single "uptime" operation; the client sends a
//! few requests and prints the replies. Run with
//! `cargo run --example loopback`.

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use muxframe::{
    CloseReason,
    HandlerError,
    ManagementChannel,
    MessageReader,
    MessageWriter,
    OperationTable,
    RawRequest,
    RequestHandler,
    transport::{FramedTransport, framed_messages},
};
use tokio::net::{TcpListener, TcpStream};

const UPTIME: u8 = 1;

struct Uptime {
    started: Instant,
    caller: String,
    millis: u64,
}

#[async_trait]
impl RequestHandler for Uptime {
    fn read_payload(&mut self, input: &mut MessageReader) -> Result<(), HandlerError> {
        self.caller = String::from_utf8_lossy(&input.read_block()?).into_owned();
        Ok(())
    }

    async fn process(&mut self) -> Result<(), HandlerError> {
        self.millis = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(())
    }

    fn write_payload(&mut self, output: &mut MessageWriter) -> Result<(), HandlerError> {
        output.write_string(&format!("hello {}, up for {}ms", self.caller, self.millis));
        Ok(())
    }
}

fn connect(stream: TcpStream, builder: muxframe::ChannelBuilder) -> ManagementChannel {
    let (read, write) = stream.into_split();
    let channel = builder.build(FramedTransport::new(write));
    let serving = channel.clone();
    tokio::spawn(async move {
        let reason = serving.serve(framed_messages(read)).await;
        tracing::info!(channel = serving.name(), %reason, "stopped serving");
    });
    channel
}

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let started = Instant::now();
    let operations = OperationTable::new("demo")
        .route(UPTIME, move || Uptime {
            started,
            caller: String::new(),
            millis: 0,
        })
        .map_err(io::Error::other)?;

    let accept = tokio::spawn(async move { listener.accept().await });
    let client_stream = TcpStream::connect(addr).await?;
    let (server_stream, _) = accept.await.map_err(io::Error::other)??;

    let server = connect(
        server_stream,
        ManagementChannel::builder()
            .name("server")
            .operation_handler(Arc::new(operations)),
    );
    let client = connect(client_stream, ManagementChannel::builder().name("client"));

    for caller in ["alice", "bob", "carol"] {
        let request = RawRequest::new(client.next_request_id(), UPTIME, caller.as_bytes());
        let reply = client
            .call(&request, |input| Ok(input.read_string()?))
            .await?;
        match reply.await {
            Ok(greeting) => println!("{greeting}"),
            Err(error) => println!("request failed: {error}"),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.close(CloseReason::Local);
    server.close(CloseReason::Local);
    Ok(())
}
