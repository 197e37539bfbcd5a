//! Write requests and their completion tickets

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use quire_core::{PublisherAddress, RecordId, SchemaId, SignerHandle, TxHandle, WriteKind};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{SyncError, SyncResult};

/// A single record write submitted by feature code
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Interaction class, picks the accumulator
    pub kind: WriteKind,
    pub schema_id: SchemaId,
    pub record_id: RecordId,
    /// Payload already encoded for `schema_id`
    pub payload: Bytes,
    /// Opaque interaction metadata, carried for events and logs only
    pub metadata: serde_json::Value,
    /// Signer to use for the group; falls back to known signers
    pub signer: Option<SignerHandle>,
    /// Publisher whose storage receives the record
    pub publisher: PublisherAddress,
}

impl WriteRequest {
    /// Create a request without metadata or explicit signer
    pub fn new(
        kind: WriteKind,
        schema_id: SchemaId,
        record_id: RecordId,
        payload: impl Into<Bytes>,
        publisher: PublisherAddress,
    ) -> Self {
        Self {
            kind,
            schema_id,
            record_id,
            payload: payload.into(),
            metadata: serde_json::Value::Null,
            signer: None,
            publisher,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_signer(mut self, signer: SignerHandle) -> Self {
        self.signer = Some(signer);
        self
    }
}

/// A request waiting inside an accumulator
///
/// Never persisted; dropping it resolves its ticket with
/// [`SyncError::WorkerStopped`].
#[derive(Debug)]
pub struct PendingWrite {
    pub request: WriteRequest,
    /// Enqueue order across all accumulators
    pub seq: u64,
    pub enqueued_at: Instant,
    completion: oneshot::Sender<SyncResult<TxHandle>>,
}

impl PendingWrite {
    /// Wrap `request`, returning the ticket its caller awaits
    pub fn new(request: WriteRequest, seq: u64) -> (Self, WriteTicket) {
        let (completion, receiver) = oneshot::channel();
        let pending = Self {
            request,
            seq,
            enqueued_at: Instant::now(),
            completion,
        };
        (pending, WriteTicket::pending(receiver))
    }

    /// Resolve the caller's ticket
    pub fn complete(self, result: SyncResult<TxHandle>) {
        // The caller may have dropped its ticket.
        let _ = self.completion.send(result);
    }
}

enum TicketState {
    Pending(oneshot::Receiver<SyncResult<TxHandle>>),
    Ready(Option<SyncResult<TxHandle>>),
}

/// Resolves once the batch carrying the write settles
///
/// Yields the transaction of the group that carried the entry, or that
/// group's error. Dropping the ticket does not cancel the write.
#[must_use = "dropping a ticket discards the write outcome, not the write"]
pub struct WriteTicket {
    state: TicketState,
}

impl WriteTicket {
    fn pending(receiver: oneshot::Receiver<SyncResult<TxHandle>>) -> Self {
        Self {
            state: TicketState::Pending(receiver),
        }
    }

    /// A ticket that is already resolved
    pub fn ready(result: SyncResult<TxHandle>) -> Self {
        Self {
            state: TicketState::Ready(Some(result)),
        }
    }
}

impl Future for WriteTicket {
    type Output = SyncResult<TxHandle>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            TicketState::Pending(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|result| result.unwrap_or(Err(SyncError::WorkerStopped))),
            TicketState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(SyncError::WorkerStopped)))
            }
        }
    }
}

impl std::fmt::Debug for WriteTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            TicketState::Pending(_) => "pending",
            TicketState::Ready(_) => "ready",
        };
        f.debug_struct("WriteTicket").field("state", &state).finish()
    }
}
