//! Pending input shared between a producer and a transport's `read`

use std::collections::VecDeque;
use std::io;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::ReadOutcome;
use crate::error::TransportError;

#[derive(Default)]
struct State {
    chunks: VecDeque<Bytes>,
    closed: bool,
    error: Option<io::Error>,
}

/// Queue of chunks waiting to be read, plus how the input ended.
#[derive(Default)]
pub(crate) struct Inbox {
    state: Mutex<State>,
    ready: Notify,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, chunk: Bytes) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.chunks.push_back(chunk);
        }
        self.ready.notify_waiters();
    }

    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_waiters();
    }

    /// Close the input with an error. Chunks queued before the failure are
    /// still delivered first.
    pub(crate) fn fail(&self, error: io::Error) {
        {
            let mut state = self.state.lock();
            state.error = Some(error);
            state.closed = true;
        }
        self.ready.notify_waiters();
    }

    pub(crate) fn take(&self) -> Result<ReadOutcome, TransportError> {
        let mut state = self.state.lock();
        if let Some(chunk) = state.chunks.pop_front() {
            return Ok(ReadOutcome::Data(chunk));
        }
        if let Some(error) = state.error.take() {
            return Err(TransportError::Io(error));
        }
        if state.closed {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::Pending)
        }
    }

    /// Wait until `take` would return something other than `Pending`.
    pub(crate) async fn ready(&self) {
        loop {
            let notified = self.ready.notified();
            {
                let state = self.state.lock();
                if !state.chunks.is_empty() || state.closed {
                    return;
                }
            }
            notified.await;
        }
    }
}
