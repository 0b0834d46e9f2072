//! Client-side table of requests awaiting a response.
//!
//! Insert-if-absent and remove-and-return are the only operations that touch
//! the table from more than one exchange, and both are atomic per entry.
//! Once removed, a [`PendingRequest`] is owned by the task completing it.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::trace;

use crate::{
    channel::ManagementChannel,
    close::CloseKey,
    error::ChannelError,
    handler::ResponseHandler,
    header::ResponseHeader,
    message::MessageReader,
    protocol::RESPONSE_END,
};

/// Bookkeeping for one outbound request awaiting its response.
pub struct PendingRequest {
    request_id: u32,
    handler: Box<dyn ResponseHandler>,
    close_key: Option<CloseKey>,
}

impl PendingRequest {
    /// Create an entry for `request_id`.
    #[must_use]
    pub fn new(
        request_id: u32,
        handler: Box<dyn ResponseHandler>,
        close_key: Option<CloseKey>,
    ) -> Self {
        Self {
            request_id,
            handler,
            close_key,
        }
    }

    /// Id of the request awaiting a response.
    #[must_use]
    pub fn request_id(&self) -> u32 { self.request_id }

    /// Disarm the close handler, if any, discarding the entry.
    pub fn release(mut self) { self.release_close_key(); }

    fn release_close_key(&mut self) {
        if let Some(key) = self.close_key.take() {
            key.release();
        }
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request_id", &self.request_id)
            .field("close_key", &self.close_key)
            .finish_non_exhaustive()
    }
}

/// Registration rejected because the id is already outstanding.
///
/// The rejected entry is handed back so its close handler can be released.
#[derive(Debug)]
pub struct DuplicateRequest(pub PendingRequest);

impl DuplicateRequest {
    /// The id that was already outstanding.
    #[must_use]
    pub fn request_id(&self) -> u32 { self.0.request_id }

    /// Recover the rejected entry.
    #[must_use]
    pub fn into_pending(self) -> PendingRequest { self.0 }
}

impl From<DuplicateRequest> for ChannelError {
    fn from(error: DuplicateRequest) -> Self { Self::DuplicateRequest(error.request_id()) }
}

/// Table of pending requests for one channel.
#[derive(Default)]
pub struct ResponseCorrelator {
    pending: DashMap<u32, PendingRequest>,
}

impl ResponseCorrelator {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Insert `pending` unless its id is already outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRequest`] holding the rejected entry if the id is
    /// live; the existing entry is left untouched.
    pub fn register(&self, pending: PendingRequest) -> Result<(), DuplicateRequest> {
        match self.pending.entry(pending.request_id) {
            Entry::Occupied(_) => Err(DuplicateRequest(pending)),
            Entry::Vacant(slot) => {
                trace!(request_id = pending.request_id, "registered pending request");
                slot.insert(pending);
                Ok(())
            }
        }
    }

    /// Deliver a response to the request it answers.
    ///
    /// The matching entry is removed before its handler runs. Its close
    /// handler is released exactly once whether decoding succeeds, fails or
    /// panics; a panic is resumed once the key is released.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::UnmatchedResponse`] if no request with the
    /// response id is pending, leaving the table unchanged. Returns handler
    /// or framing errors if the payload cannot be decoded or the end marker
    /// is missing.
    pub fn complete(
        &self,
        channel: &ManagementChannel,
        header: &ResponseHeader,
        input: &mut MessageReader,
    ) -> Result<(), ChannelError> {
        let response_id = header.response_id();
        let Some((_, mut pending)) = self.pending.remove(&response_id) else {
            return Err(ChannelError::UnmatchedResponse(response_id));
        };
        trace!(response_id, "handling response");
        let result = catch_unwind(AssertUnwindSafe(|| {
            read_response(&mut pending, channel, header, input)
        }));
        pending.release();
        let result = result.unwrap_or_else(|panic| resume_unwind(panic));
        trace!(response_id, ok = result.is_ok(), "handled response");
        result
    }

    /// Remove the entry for `request_id` without completing it.
    pub fn cancel(&self, request_id: u32) -> Option<PendingRequest> {
        self.pending.remove(&request_id).map(|(_, pending)| pending)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize { self.pending.len() }

    /// Returns true if no request is awaiting a response.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.pending.is_empty() }

    /// Ids awaiting a response, in ascending order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every pending entry, returning how many were removed.
    ///
    /// Close keys are discarded without release; the channel fires the
    /// close handlers itself.
    pub fn clear(&self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

impl fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("pending", &self.pending_ids())
            .finish()
    }
}

fn read_response(
    pending: &mut PendingRequest,
    channel: &ManagementChannel,
    header: &ResponseHeader,
    input: &mut MessageReader,
) -> Result<(), ChannelError> {
    pending.handler.bind_context(header, channel);
    pending.handler.read_payload(input)?;
    input.expect_end(RESPONSE_END)?;
    Ok(())
}
