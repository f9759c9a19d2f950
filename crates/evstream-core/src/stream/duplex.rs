//! Readable and writable over one transport, with one destroy lifecycle.
//!
//! The read side and the write side keep independent state. `end` on the
//! write side does not end the read side and `after_end` does not stop
//! writes; only `destroy` affects both.

use std::sync::Arc;

use super::base::StreamBase;
use super::readable::ReadableSide;
use super::writable::WritableCore;
use super::{ReadableStream, Stream, WritableStream};
use crate::scheduler::Scheduler;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct Duplex {
    base: Arc<StreamBase>,
    readable: Arc<ReadableSide>,
    writable: Arc<WritableCore>,
}

impl Duplex {
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_transport(Arc::new(transport), Scheduler::current())
    }

    pub fn with_transport(transport: Arc<dyn Transport>, scheduler: Scheduler) -> Self {
        Self {
            base: StreamBase::new(transport, scheduler),
            readable: Arc::new(ReadableSide::new()),
            writable: Arc::new(WritableCore::new()),
        }
    }
}

impl Stream for Duplex {
    fn base(&self) -> &Arc<StreamBase> {
        &self.base
    }

    fn readable(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        true
    }
}

impl ReadableStream for Duplex {
    fn readable_side(&self) -> &Arc<ReadableSide> {
        &self.readable
    }
}

impl WritableStream for Duplex {
    fn writable_core(&self) -> &Arc<WritableCore> {
        &self.writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, StreamEvent};
    use crate::lifecycle::{ReadState, WriteState};
    use crate::transport::MemoryTransport;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_duplex_has_both_capabilities() {
        let stream = Duplex::new(MemoryTransport::new());
        assert!(stream.readable());
        assert!(stream.writable());
        assert_eq!(stream.read_state(), ReadState::Open);
        assert_eq!(stream.write_state(), WriteState::Open);
    }

    #[tokio::test]
    async fn test_sides_are_independent() {
        let transport = MemoryTransport::new();
        let stream = Duplex::new(transport.clone());
        let pushed = Arc::new(Mutex::new(Vec::new()));
        {
            let pushed = pushed.clone();
            stream.on(EventKind::Data, move |event| {
                if let StreamEvent::Data(chunk) = event {
                    pushed.lock().push(chunk.clone());
                }
            });
        }

        stream.write("out");
        stream.push("in");
        stream.end();
        settle().await;

        assert_eq!(*pushed.lock(), vec![Bytes::from_static(b"in")]);
        assert_eq!(transport.writes(), vec![Bytes::from_static(b"out")]);
        assert!(stream.writable_finished());
        assert!(!stream.readable_ended());

        // The read side keeps going after the write side finished.
        stream.push("more").after_end();
        assert!(stream.readable_ended());
        assert_eq!(pushed.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_single_destroy_for_both_sides() {
        let transport = MemoryTransport::new();
        let stream = Duplex::new(transport.clone());
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let closes = closes.clone();
            stream.on(EventKind::Close, move |_| {
                closes.fetch_add(1, Ordering::SeqCst);
            });
        }

        let other = stream.clone();
        stream.destroy();
        other.destroy();
        settle().await;

        assert!(stream.destroyed());
        assert!(other.destroyed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(transport.destroy_count(), 1);
    }
}
