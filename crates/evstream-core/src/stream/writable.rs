//! Writable capability: buffered writes, flush cycles and the finish state
//! machine.
//!
//! ```text
//!   Open --end()--> Ending --finalize ok--> Finished
//! ```
//!
//! Writes append to one buffer. A flush cycle takes the whole buffer and
//! hands it to the transport in a single write, so several writes queued
//! before a flush runs reach the transport as one chunk. Flush cycles and
//! finalize are serialized per stream by `gate`: at most one transport write
//! is in flight, and finalize only runs after every cycle queued ahead of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::base::StreamBase;
use super::{Stream, WritableStream};
use crate::error::StreamError;
use crate::event::{EventKind, StreamEvent};
use crate::lifecycle::{Latch, Lifecycle, WriteState};
use crate::scheduler::{self, Scheduler};
use crate::transport::Transport;

/// Callback run once by the write path
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// Nothing buffered, or already finished
    Idle,
    /// At least one write succeeded and the buffer is empty
    Flushed,
    /// The transport write failed; `error` was emitted
    Failed,
}

impl FlushOutcome {
    pub(crate) fn completed(self) -> bool {
        !matches!(self, FlushOutcome::Failed)
    }
}

#[derive(Debug, Default)]
struct WriteSide {
    state: WriteState,
    buffer: BytesMut,
}

#[derive(Debug, Default)]
pub struct WritableCore {
    side: Mutex<WriteSide>,
    gate: tokio::sync::Mutex<()>,
    finalize_started: Latch,
    finish_emitted: Latch,
    /// Failed flush cycles so far
    write_failures: AtomicU64,
}

impl WritableCore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WriteState {
        self.side.lock().state
    }

    pub fn is_ended(&self) -> bool {
        self.state() != WriteState::Open
    }

    pub fn is_finished(&self) -> bool {
        self.state() == WriteState::Finished
    }

    /// Bytes accepted but not yet handed to the transport.
    pub fn buffered_len(&self) -> usize {
        self.side.lock().buffer.len()
    }

    /// Append `chunk` and queue a flush cycle. Ignored after `end`.
    ///
    /// Returns whether the buffer is empty after the append. That is only a
    /// hint: the queued flush has not run yet.
    pub(crate) fn write(
        self: &Arc<Self>,
        base: &Arc<StreamBase>,
        chunk: &[u8],
        callback: Option<Continuation>,
    ) -> bool {
        let empty = {
            let mut side = self.side.lock();
            if side.state != WriteState::Open {
                trace!(stream = base.id(), len = chunk.len(), "write after end ignored");
                return side.buffer.is_empty();
            }
            side.buffer.extend_from_slice(chunk);
            side.buffer.is_empty()
        };

        self.schedule_flush(base);
        if let Some(callback) = callback {
            callback();
        }
        empty
    }

    /// Declare the end of writes, optionally with a trailing chunk and a
    /// callback for `finish`.
    pub(crate) fn end(
        self: &Arc<Self>,
        base: &Arc<StreamBase>,
        chunk: Option<&[u8]>,
        callback: Option<Continuation>,
    ) {
        let (pending, failures) = {
            let mut side = self.side.lock();
            match chunk {
                Some(chunk) if side.state != WriteState::Finished => {
                    side.buffer.extend_from_slice(chunk);
                }
                Some(chunk) if !chunk.is_empty() => {
                    debug!(
                        stream = base.id(),
                        len = chunk.len(),
                        "trailing chunk after finish dropped"
                    );
                }
                _ => {}
            }
            side.state.try_transition(WriteState::Open, WriteState::Ending);
            // Finalize only if every flush cycle from here on succeeds.
            let failures = self.write_failures.load(Ordering::Acquire);
            (!side.buffer.is_empty(), failures)
        };

        if let Some(callback) = callback {
            self.on_finish(base, callback);
        }

        let core = Arc::clone(self);
        let task_base = Arc::clone(base);
        base.scheduler().submit(async move {
            if pending && !core.flush(&task_base).await.completed() {
                return;
            }
            core.finalize(&task_base, failures).await;
        });
    }

    /// Run `callback` once `finish` has been emitted, or right away if it
    /// already has been.
    fn on_finish(&self, base: &StreamBase, callback: Continuation) {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let listener_slot = Arc::clone(&slot);
        base.events().once(EventKind::Finish, move |_| {
            let callback = listener_slot.lock().take();
            if let Some(callback) = callback {
                callback();
            }
        });

        if self.finish_emitted.is_set() {
            let callback = slot.lock().take();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    fn schedule_flush(self: &Arc<Self>, base: &Arc<StreamBase>) {
        let core = Arc::clone(self);
        let task_base = Arc::clone(base);
        base.scheduler().submit(async move {
            core.flush(&task_base).await;
        });
    }

    /// Take the whole buffer, unless finished or empty.
    fn take_buffer(&self) -> Option<Bytes> {
        let mut side = self.side.lock();
        if side.state == WriteState::Finished || side.buffer.is_empty() {
            return None;
        }
        Some(side.buffer.split().freeze())
    }

    /// One flush cycle, repeated on the next tick for as long as writers
    /// keep refilling the buffer while a write is in flight.
    pub(crate) async fn flush(&self, base: &StreamBase) -> FlushOutcome {
        let _gate = self.gate.lock().await;

        let Some(mut data) = self.take_buffer() else {
            return FlushOutcome::Idle;
        };

        loop {
            let len = data.len();
            debug!(stream = base.id(), len, "flush cycle");

            if let Err(source) = base.transport().write(data).await {
                let discarded = {
                    let mut side = self.side.lock();
                    self.write_failures.fetch_add(1, Ordering::AcqRel);
                    side.buffer.split().len()
                };
                let dropped = len + discarded;
                warn!(
                    stream = base.id(),
                    transport = base.transport().name(),
                    dropped,
                    error = %source,
                    "transport write failed"
                );
                base.emit_error(StreamError::Write { dropped, source });
                return FlushOutcome::Failed;
            }

            if self.side.lock().buffer.is_empty() {
                base.events().emit(StreamEvent::Drain);
                return FlushOutcome::Flushed;
            }

            scheduler::next_tick().await;
            match self.take_buffer() {
                Some(next) => data = next,
                None => return FlushOutcome::Flushed,
            }
        }
    }

    /// Run the transport finalize once the stream is ending with an empty
    /// buffer and no flush cycle failed since `end` observed `failures`.
    /// Stale calls are no-ops.
    pub(crate) async fn finalize(&self, base: &StreamBase, failures: u64) {
        let _gate = self.gate.lock().await;

        if self.write_failures.load(Ordering::Acquire) != failures {
            debug!(stream = base.id(), "finalize skipped after failed flush");
            return;
        }
        {
            let side = self.side.lock();
            if side.state != WriteState::Ending || !side.buffer.is_empty() {
                trace!(stream = base.id(), state = ?side.state, "finalize skipped");
                return;
            }
        }
        if !self.finalize_started.try_set() {
            return;
        }

        match base.transport().finalize().await {
            Ok(()) => self.after_finish(base),
            Err(source) => {
                warn!(
                    stream = base.id(),
                    transport = base.transport().name(),
                    error = %source,
                    "transport finalize failed, stream stays ending"
                );
                base.emit_error(StreamError::Finalize { source });
            }
        }
    }

    /// Emit `finish` exactly once, then flip to `Finished`. Listeners still
    /// observe `is_finished() == false`.
    pub(crate) fn after_finish(&self, base: &StreamBase) {
        if !self.finish_emitted.try_set() {
            return;
        }
        debug!(stream = base.id(), "stream finished");
        base.events().emit(StreamEvent::Finish);
        self.side
            .lock()
            .state
            .try_transition(WriteState::Ending, WriteState::Finished);
    }
}

/// A stream that only consumes data
#[derive(Debug, Clone)]
pub struct Writable {
    base: Arc<StreamBase>,
    core: Arc<WritableCore>,
}

impl Writable {
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_transport(Arc::new(transport), Scheduler::current())
    }

    pub fn with_transport(transport: Arc<dyn Transport>, scheduler: Scheduler) -> Self {
        Self {
            base: StreamBase::new(transport, scheduler),
            core: Arc::new(WritableCore::new()),
        }
    }
}

impl Stream for Writable {
    fn base(&self) -> &Arc<StreamBase> {
        &self.base
    }

    fn readable(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        true
    }
}

impl WritableStream for Writable {
    fn writable_core(&self) -> &Arc<WritableCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, TransportCall};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn count(stream: &Writable, kind: EventKind) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        stream.on(kind, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
        let hit = Arc::new(AtomicBool::new(false));
        let setter = hit.clone();
        (hit, move || setter.store(true, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_write_returns_buffer_hint() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());

        assert!(stream.write(""));
        assert!(!stream.write("a"));
        assert_eq!(stream.writable_length(), 1);

        settle().await;
        assert_eq!(stream.writable_length(), 0);
        assert_eq!(&transport.written()[..], b"a");
        assert!(!stream.readable());
        assert!(stream.writable());
    }

    #[tokio::test]
    async fn test_write_callback_runs_before_return() {
        let stream = Writable::new(MemoryTransport::new());
        let (hit, callback) = flag();

        stream.write_with(b"payload", callback);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_write_after_end_is_ignored() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let (hit, callback) = flag();

        stream.end();
        assert!(stream.writable_ended());
        assert!(stream.write_with("late", callback));
        assert!(!hit.load(Ordering::SeqCst));

        settle().await;
        assert!(transport.writes().is_empty());
        assert!(stream.writable_finished());
    }

    #[tokio::test]
    async fn test_writes_during_flush_coalesce() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let drains = count(&stream, EventKind::Drain);

        transport.hold_writes();
        stream.write("a");
        settle().await;
        assert_eq!(transport.write_count(), 1);

        stream.write("b");
        stream.write("c");
        transport.release_writes();
        settle().await;

        assert_eq!(
            transport.writes(),
            vec![Bytes::from_static(b"a"), Bytes::from_static(b"bc")]
        );
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finish_listener_sees_unfinished_state() {
        let stream = Writable::new(MemoryTransport::new());
        let observed = Arc::new(parking_lot::Mutex::new(None));
        {
            let observed = observed.clone();
            let inner = stream.clone();
            stream.on(EventKind::Finish, move |_| {
                *observed.lock() = Some(inner.writable_finished());
            });
        }

        stream.write("x");
        stream.end();
        settle().await;

        assert_eq!(*observed.lock(), Some(false));
        assert!(stream.writable_finished());
        assert_eq!(stream.write_state(), WriteState::Finished);
    }

    #[tokio::test]
    async fn test_repeated_end_finishes_once() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let finishes = count(&stream, EventKind::Finish);
        let calls = Arc::new(AtomicUsize::new(0));

        stream.write("x");
        stream.end().end();
        {
            let calls = calls.clone();
            stream.end_then(None, move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        settle().await;
        stream.end();
        settle().await;

        assert_eq!(finishes.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.finalize_count(), 1);
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Write(Bytes::from_static(b"x")), TransportCall::Finalize]
        );
    }

    #[tokio::test]
    async fn test_end_with_trailing_chunk() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());

        stream.write("a");
        stream.end_with("b");
        stream.end_with("c");
        settle().await;

        assert_eq!(transport.writes(), vec![Bytes::from_static(b"abc")]);
        assert!(stream.writable_finished());

        stream.end_with("after finish");
        settle().await;
        assert_eq!(transport.writes(), vec![Bytes::from_static(b"abc")]);
        assert_eq!(transport.finalize_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_end_chunk_flushes_before_finalize() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());

        transport.hold_writes();
        stream.write("a");
        stream.end();
        settle().await;
        stream.end_with("b");
        transport.release_writes();
        settle().await;

        assert_eq!(
            transport.calls(),
            vec![
                TransportCall::Write(Bytes::from_static(b"a")),
                TransportCall::Write(Bytes::from_static(b"b")),
                TransportCall::Finalize,
            ]
        );
        assert!(stream.writable_finished());
    }

    #[tokio::test]
    async fn test_end_then_after_finish_runs_immediately() {
        let stream = Writable::new(MemoryTransport::new());
        stream.end();
        settle().await;
        assert!(stream.writable_finished());

        let (hit, callback) = flag();
        stream.end_then(None, callback);
        assert!(hit.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_finalize_waits_for_in_flight_write() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());

        transport.hold_writes();
        stream.write("a");
        settle().await;
        stream.end();
        settle().await;
        assert_eq!(transport.finalize_count(), 0);
        assert!(!stream.writable_finished());

        transport.release_writes();
        settle().await;
        assert_eq!(
            transport.calls(),
            vec![TransportCall::Write(Bytes::from_static(b"a")), TransportCall::Finalize]
        );
        assert!(stream.writable_finished());
    }

    #[tokio::test]
    async fn test_write_failure_reports_dropped_bytes() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let mut errors = stream.subscribe(EventKind::Error);

        transport.fail_writes(true);
        stream.write("abc");
        settle().await;

        match errors.recv().await {
            Some(StreamEvent::Error(err)) => {
                assert!(matches!(*err, StreamError::Write { dropped: 3, .. }));
                assert!(!err.requires_destroy());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(stream.writable_length(), 0);
        assert_eq!(stream.write_state(), WriteState::Open);

        transport.fail_writes(false);
        stream.write("d");
        settle().await;
        assert_eq!(&transport.written()[..], b"abcd");
    }

    #[tokio::test]
    async fn test_failed_write_skips_finalize() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let finishes = count(&stream, EventKind::Finish);

        transport.fail_writes(true);
        stream.write("abc");
        stream.end();
        settle().await;

        assert_eq!(transport.finalize_count(), 0);
        assert_eq!(finishes.load(Ordering::SeqCst), 0);
        assert_eq!(stream.write_state(), WriteState::Ending);
    }

    #[tokio::test]
    async fn test_end_after_failed_flush_retries_finalize() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let mut errors = stream.subscribe(EventKind::Error);

        transport.fail_writes(true);
        stream.write("x");
        stream.end();
        settle().await;

        match errors.recv().await {
            Some(StreamEvent::Error(err)) => assert!(!err.requires_destroy()),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(transport.finalize_count(), 0);
        assert_eq!(stream.write_state(), WriteState::Ending);

        transport.fail_writes(false);
        stream.end();
        settle().await;

        assert_eq!(transport.finalize_count(), 1);
        assert!(stream.writable_finished());
    }

    #[tokio::test]
    async fn test_finalize_failure_leaves_stream_ending() {
        let transport = MemoryTransport::new();
        let stream = Writable::new(transport.clone());
        let mut errors = stream.subscribe(EventKind::Error);
        let closes = count(&stream, EventKind::Close);

        transport.fail_finalize(true);
        stream.end();
        settle().await;

        match errors.recv().await {
            Some(StreamEvent::Error(err)) => assert!(err.requires_destroy()),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(stream.write_state(), WriteState::Ending);

        transport.fail_finalize(false);
        stream.end();
        settle().await;
        assert_eq!(transport.finalize_count(), 1);
        assert!(!stream.writable_finished());

        stream.destroy();
        settle().await;
        assert!(stream.destroyed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
