//! Deferred continuations
//!
//! Streams never block their caller. Work that has to wait on a transport is
//! submitted here as a task and runs on a later turn of the runtime. On a
//! current-thread runtime tasks run cooperatively in submission order.

use std::future::Future;

use tokio::runtime::Handle;

/// Task submission handle captured when a stream is constructed
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    /// Scheduler for the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self {
            handle: Handle::current(),
        }
    }

    /// Like [`Scheduler::current`] but returns `None` outside a runtime.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Queue a continuation. Returns immediately.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Detached: outcomes are reported through stream events.
        drop(self.handle.spawn(task));
    }
}

/// Give every other queued task a turn before continuing.
pub async fn next_tick() {
    tokio::task::yield_now().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_submit_runs_in_fifo_order() {
        let scheduler = Scheduler::current();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();

        for n in 0..4 {
            let order = order.clone();
            scheduler.submit(async move {
                order.lock().push(n);
            });
        }
        scheduler.submit(async move {
            let _ = tx.send(());
        });

        rx.await.unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_try_current_outside_runtime() {
        assert!(Scheduler::try_current().is_none());
    }
}
