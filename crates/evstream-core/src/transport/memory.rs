//! In-memory transport
//!
//! Records every call it receives and can be told to fail or to hold writes
//! in flight. Used by the test suites and the loopback example.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::inbox::Inbox;
use super::{ReadOutcome, Transport};
use crate::error::TransportError;

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Write(Bytes),
    Finalize,
    Destroy,
}

struct Inner {
    name: String,
    calls: Mutex<Vec<TransportCall>>,
    fail_writes: AtomicBool,
    fail_finalize: AtomicBool,
    fail_destroy: AtomicBool,
    hold_writes: AtomicBool,
    released: Notify,
    input: Inbox,
}

/// Cloneable handle; clones share the same recorded state.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                calls: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                fail_finalize: AtomicBool::new(false),
                fail_destroy: AtomicBool::new(false),
                hold_writes: AtomicBool::new(false),
                released: Notify::new(),
                input: Inbox::new(),
            }),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_finalize(&self, fail: bool) {
        self.inner.fail_finalize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.inner.fail_destroy.store(fail, Ordering::SeqCst);
    }

    /// Keep subsequent writes in flight until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.inner.hold_writes.store(true, Ordering::SeqCst);
    }

    pub fn release_writes(&self) {
        self.inner.hold_writes.store(false, Ordering::SeqCst);
        self.inner.released.notify_waiters();
    }

    /// Queue a chunk for `read`.
    pub fn feed(&self, chunk: impl Into<Bytes>) {
        self.inner.input.push(chunk.into());
    }

    /// Make `read` fail once the queue is drained, then report end of input.
    pub fn fail_input(&self, message: &str) {
        self.inner
            .input
            .fail(std::io::Error::new(std::io::ErrorKind::Other, message.to_string()));
    }

    /// Make `read` report end of input once the queue is drained.
    pub fn close_input(&self) {
        self.inner.input.close();
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.calls.lock().clone()
    }

    /// Every chunk passed to `write`, in call order.
    pub fn writes(&self) -> Vec<Bytes> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Concatenation of every write.
    pub fn written(&self) -> Bytes {
        let mut all = BytesMut::new();
        for chunk in self.writes() {
            all.extend_from_slice(&chunk);
        }
        all.freeze()
    }

    pub fn write_count(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Write(_)))
    }

    pub fn finalize_count(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Finalize))
    }

    pub fn destroy_count(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Destroy))
    }

    fn count(&self, pred: impl Fn(&TransportCall) -> bool) -> usize {
        self.inner.calls.lock().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: TransportCall) {
        self.inner.calls.lock().push(call);
    }

    async fn wait_for_release(&self) {
        loop {
            let released = self.inner.released.notified();
            if !self.inner.hold_writes.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        self.record(TransportCall::Write(data));
        self.wait_for_release().await;
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::other("injected write failure"));
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Finalize);
        if self.inner.fail_finalize.load(Ordering::SeqCst) {
            return Err(TransportError::other("injected finalize failure"));
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Destroy);
        if self.inner.fail_destroy.load(Ordering::SeqCst) {
            return Err(TransportError::other("injected destroy failure"));
        }
        Ok(())
    }

    fn read(&self) -> Result<ReadOutcome, TransportError> {
        self.inner.input.take()
    }

    async fn read_ready(&self) {
        self.inner.input.ready().await;
    }
}
