//! Readable capability: push-based data hand-off and the `end` lifecycle.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use super::base::StreamBase;
use super::{ReadableStream, Stream};
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::lifecycle::{ReadState, StateCell};
use crate::scheduler::Scheduler;
use crate::transport::{ReadOutcome, Transport};

/// Outcome of pulling from a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// Everything available was pushed; more may come later
    Pending,
    /// The source is exhausted and `end` has been emitted
    Ended,
    /// The transport read failed and `error` has been emitted
    Failed,
}

#[derive(Debug, Default)]
pub struct ReadableSide {
    state: StateCell<ReadState>,
}

impl ReadableSide {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReadState {
        self.state.get()
    }

    pub fn is_ended(&self) -> bool {
        self.state() == ReadState::Ended
    }

    /// Hand a chunk to `data` listeners. No buffering, no end check.
    pub(crate) fn push(&self, base: &StreamBase, chunk: Bytes) {
        trace!(stream = base.id(), len = chunk.len(), "push");
        base.events().emit(StreamEvent::Data(chunk));
    }

    pub(crate) fn after_end(&self, base: &StreamBase) {
        if self.state.try_transition(ReadState::Open, ReadState::Ended) {
            base.events().emit(StreamEvent::End);
        }
    }

    /// Push every chunk the transport has available right now.
    pub(crate) fn pump(&self, base: &StreamBase) -> PumpStatus {
        loop {
            if self.is_ended() {
                return PumpStatus::Ended;
            }
            match base.transport().read() {
                Ok(ReadOutcome::Data(chunk)) => {
                    if !chunk.is_empty() {
                        self.push(base, chunk);
                    }
                }
                Ok(ReadOutcome::Pending) => return PumpStatus::Pending,
                Ok(ReadOutcome::Eof) => {
                    self.after_end(base);
                    return PumpStatus::Ended;
                }
                Err(source) => {
                    base.emit_error(StreamError::Read { source });
                    return PumpStatus::Failed;
                }
            }
        }
    }

    pub(crate) async fn pump_until_end(side: Arc<Self>, base: Arc<StreamBase>) -> PumpStatus {
        loop {
            if base.is_destroyed() {
                return PumpStatus::Pending;
            }
            match side.pump(&base) {
                PumpStatus::Pending => base.transport().read_ready().await,
                status => return status,
            }
        }
    }
}

/// A stream that only produces data
#[derive(Debug, Clone)]
pub struct Readable {
    base: Arc<StreamBase>,
    side: Arc<ReadableSide>,
}

impl Readable {
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_transport(Arc::new(transport), Scheduler::current())
    }

    pub fn with_transport(transport: Arc<dyn Transport>, scheduler: Scheduler) -> Self {
        Self {
            base: StreamBase::new(transport, scheduler),
            side: Arc::new(ReadableSide::new()),
        }
    }
}

impl Stream for Readable {
    fn base(&self) -> &Arc<StreamBase> {
        &self.base
    }

    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        false
    }
}

impl ReadableStream for Readable {
    fn readable_side(&self) -> &Arc<ReadableSide> {
        &self.side
    }
}
