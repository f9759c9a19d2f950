//! Streams
//!
//! A stream handle composes one [`StreamBase`] (identity, events, transport,
//! destroy lifecycle) with the capabilities it offers:
//!
//! - [`Readable`]: [`ReadableSide`]
//! - [`Writable`]: [`WritableCore`]
//! - [`Duplex`]: both, sharing a single destroy lifecycle
//!
//! The operations live on the [`Stream`], [`ReadableStream`] and
//! [`WritableStream`] traits. Handles are cheap to clone; clones drive the
//! same stream.
//!
//! None of the operations block or fail at the call site. Transport work runs
//! on the [`Scheduler`](crate::Scheduler) and its outcome is reported through
//! events.

mod base;
mod duplex;
mod readable;
mod writable;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::event::{EventKind, ListenerId, StreamEvent};
use crate::lifecycle::{DestroyState, ReadState, WriteState};
use crate::transport::ReadOutcome;

pub use base::StreamBase;
pub use duplex::Duplex;
pub use readable::{PumpStatus, Readable, ReadableSide};
pub use writable::{Continuation, Writable, WritableCore};

/// Destroy lifecycle and event registration, common to every stream
pub trait Stream {
    fn base(&self) -> &Arc<StreamBase>;

    /// Whether this handle carries the readable capability
    fn readable(&self) -> bool;

    /// Whether this handle carries the writable capability
    fn writable(&self) -> bool;

    fn id(&self) -> u64 {
        self.base().id()
    }

    fn destroyed(&self) -> bool {
        self.base().is_destroyed()
    }

    fn destroy_state(&self) -> DestroyState {
        self.base().destroy_state()
    }

    /// Release the transport and emit `close` on success. Safe to call any
    /// number of times; `close` fires at most once.
    fn destroy(&self) {
        self.base().destroy();
    }

    /// Force the destroyed state without calling the transport, e.g. after
    /// the transport already failed elsewhere. Emits `close` at most once.
    fn after_destroy(&self) {
        self.base().after_destroy();
    }

    fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.base().events().on(kind, listener)
    }

    fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnOnce(&StreamEvent) + Send + 'static,
    {
        self.base().events().once(kind, listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.base().events().off(id)
    }

    fn subscribe(&self, kind: EventKind) -> mpsc::UnboundedReceiver<StreamEvent> {
        self.base().events().subscribe(kind)
    }
}

/// Push-based data production
pub trait ReadableStream: Stream {
    fn readable_side(&self) -> &Arc<ReadableSide>;

    fn readable_ended(&self) -> bool {
        self.readable_side().is_ended()
    }

    fn read_state(&self) -> ReadState {
        self.readable_side().state()
    }

    /// Emit `data` with `chunk` right away. Producers must stop pushing once
    /// they called [`after_end`](Self::after_end); nothing enforces it.
    fn push(&self, chunk: impl Into<Bytes>) -> &Self
    where
        Self: Sized,
    {
        self.readable_side().push(self.base(), chunk.into());
        self
    }

    /// Signal that no more data will be pushed. Emits `end` at most once.
    fn after_end(&self) {
        self.readable_side().after_end(self.base());
    }

    /// Pull from the transport without pushing.
    fn read(&self) -> Result<ReadOutcome, TransportError> {
        self.base().transport().read()
    }

    /// Push everything the transport has available, ending the stream on EOF.
    fn pump(&self) -> PumpStatus {
        self.readable_side().pump(self.base())
    }

    /// Keep pumping as the transport becomes ready, until the stream ends,
    /// a read fails, or the stream is destroyed.
    fn pump_until_end(&self) -> Pin<Box<dyn Future<Output = PumpStatus> + Send + 'static>> {
        Box::pin(ReadableSide::pump_until_end(
            Arc::clone(self.readable_side()),
            Arc::clone(self.base()),
        ))
    }
}

/// Buffered writes with a guarded finish
pub trait WritableStream: Stream {
    fn writable_core(&self) -> &Arc<WritableCore>;

    /// Queue `chunk` (bytes, or text as UTF-8) and schedule a flush.
    ///
    /// Ignored once the stream is ending. Returns `true` when the internal
    /// buffer is empty, a coarse backpressure hint.
    fn write(&self, chunk: impl AsRef<[u8]>) -> bool {
        self.writable_core().write(self.base(), chunk.as_ref(), None)
    }

    /// Like [`write`](Self::write), invoking `callback` once the write has
    /// been accepted (not once it reached the transport).
    fn write_with<F>(&self, chunk: impl AsRef<[u8]>, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.writable_core().write(self.base(), chunk.as_ref(), Some(Box::new(callback)))
    }

    /// Declare that no more writes will follow. Remaining data is flushed and
    /// the transport finalized; `finish` follows on success.
    fn end(&self) -> &Self
    where
        Self: Sized,
    {
        self.writable_core().end(self.base(), None, None);
        self
    }

    /// [`end`](Self::end) with a trailing chunk.
    fn end_with(&self, chunk: impl AsRef<[u8]>) -> &Self
    where
        Self: Sized,
    {
        self.writable_core().end(self.base(), Some(chunk.as_ref()), None);
        self
    }

    /// [`end`](Self::end) with an optional trailing chunk and a callback run
    /// when `finish` is emitted.
    fn end_then<F>(&self, chunk: Option<&[u8]>, on_finish: F) -> &Self
    where
        Self: Sized,
        F: FnOnce() + Send + 'static,
    {
        self.writable_core().end(self.base(), chunk, Some(Box::new(on_finish)));
        self
    }

    fn writable_ended(&self) -> bool {
        self.writable_core().is_ended()
    }

    fn writable_finished(&self) -> bool {
        self.writable_core().is_finished()
    }

    fn write_state(&self) -> WriteState {
        self.writable_core().state()
    }

    /// Bytes accepted but not yet handed to the transport
    fn writable_length(&self) -> usize {
        self.writable_core().buffered_len()
    }
}
