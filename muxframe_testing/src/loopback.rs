//! Two channels connected in memory, both serving.

use std::sync::Arc;

use muxframe::{CloseReason, ManagementChannel, OperationHandler, transport::memory_pair};
use tokio::task::JoinHandle;

const CAPACITY: usize = 64;

/// A client and a server channel joined by a [`memory_pair`].
///
/// Both sides run [`ManagementChannel::serve`] on spawned tasks, so requests
/// may flow either way.
#[derive(Debug)]
pub struct Loopback {
    /// Side normally sending requests.
    pub client: ManagementChannel,
    /// Side normally answering them.
    pub server: ManagementChannel,
    tasks: Vec<JoinHandle<CloseReason>>,
}

impl Loopback {
    /// Connect a client to a server answering with `operations`.
    #[must_use]
    pub fn new(operations: Arc<dyn OperationHandler>) -> Self {
        let (left, right) = memory_pair(CAPACITY);
        let client = ManagementChannel::builder()
            .name("client")
            .build(left.transport);
        let server = ManagementChannel::builder()
            .name("server")
            .operation_handler(operations)
            .build(right.transport);

        let tasks = vec![
            tokio::spawn({
                let client = client.clone();
                async move { client.serve(left.inbound).await }
            }),
            tokio::spawn({
                let server = server.clone();
                async move { server.serve(right.inbound).await }
            }),
        ];
        Self {
            client,
            server,
            tasks,
        }
    }

    /// Close both channels and wait for their serve loops, returning the
    /// reasons they stopped with, client first.
    ///
    /// # Panics
    ///
    /// Panics if a serve task panicked.
    pub async fn shutdown(self) -> Vec<CloseReason> {
        self.client.close(CloseReason::Local);
        self.server.close(CloseReason::Local);
        let mut reasons = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            reasons.push(task.await.expect("serve task panicked"));
        }
        reasons
    }
}
