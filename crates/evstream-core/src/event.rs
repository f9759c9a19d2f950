//! Stream events
//!
//! Every stream owns one [`EventChannel`]. Listeners run synchronously on the
//! emitting task, in registration order. The channel lock is released before
//! any listener runs, so a listener may call back into the stream (or the
//! channel) freely.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::StreamError;

/// Names of the lifecycle events a stream can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    End,
    Drain,
    Finish,
    Close,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Data => "data",
            EventKind::End => "end",
            EventKind::Drain => "drain",
            EventKind::Finish => "finish",
            EventKind::Close => "close",
            EventKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// An emitted event with its payload
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk handed to consumers by `push`
    Data(Bytes),
    /// The readable side has no more data
    End,
    /// The write buffer was handed to the transport and is empty again
    Drain,
    /// The writable side finalized
    Finish,
    /// The stream was destroyed
    Close,
    /// A transport operation failed
    Error(Arc<StreamError>),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Data(_) => EventKind::Data,
            StreamEvent::End => EventKind::End,
            StreamEvent::Drain => EventKind::Drain,
            StreamEvent::Finish => EventKind::Finish,
            StreamEvent::Close => EventKind::Close,
            StreamEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Handle returned by listener registration, used with [`EventChannel::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Callback {
    Persistent(Arc<dyn Fn(&StreamEvent) + Send + Sync>),
    Once(Box<dyn FnOnce(&StreamEvent) + Send>),
    Channel(mpsc::UnboundedSender<StreamEvent>),
}

impl Callback {
    /// A second handle to the same listener, or `None` for one-shot
    /// listeners which must be moved out instead.
    fn share(&self) -> Option<Callback> {
        match self {
            Callback::Persistent(listener) => Some(Callback::Persistent(Arc::clone(listener))),
            Callback::Channel(tx) => Some(Callback::Channel(tx.clone())),
            Callback::Once(_) => None,
        }
    }

    /// Channel listener whose receiver was dropped
    fn is_closed(&self) -> bool {
        matches!(self, Callback::Channel(tx) if tx.is_closed())
    }

    fn invoke(self, event: &StreamEvent) {
        match self {
            Callback::Persistent(listener) => listener(event),
            Callback::Once(listener) => listener(event),
            Callback::Channel(tx) => {
                // Receiver gone: the entry is pruned on the next emit.
                let _ = tx.send(event.clone());
            }
        }
    }
}

struct Entry {
    id: ListenerId,
    kind: EventKind,
    callback: Callback,
}

/// Named-event publish/subscribe
pub struct EventChannel {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventChannel {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, kind: EventKind, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push(Entry { id, kind, callback });
        id
    }

    /// Register a listener invoked on every `kind` event
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.register(kind, Callback::Persistent(Arc::new(listener)))
    }

    /// Register a listener removed before its first invocation
    pub fn once<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnOnce(&StreamEvent) + Send + 'static,
    {
        self.register(kind, Callback::Once(Box::new(listener)))
    }

    /// Receive `kind` events through a channel. The listener is dropped
    /// once the receiver is.
    pub fn subscribe(&self, kind: EventKind) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(kind, Callback::Channel(tx));
        rx
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.kind == kind)
            .filter(|entry| !entry.callback.is_closed())
            .count()
    }

    /// Invoke every current `event.kind()` listener in registration order.
    /// Returns the number of listeners invoked.
    pub fn emit(&self, event: StreamEvent) -> usize {
        let kind = event.kind();
        let ready = {
            let mut entries = self.entries.lock();
            entries.retain(|entry| !entry.callback.is_closed());

            let mut ready = Vec::new();
            let mut i = 0;
            while i < entries.len() {
                if entries[i].kind != kind {
                    i += 1;
                    continue;
                }
                match entries[i].callback.share() {
                    Some(callback) => {
                        ready.push(callback);
                        i += 1;
                    }
                    None => ready.push(entries.remove(i).callback),
                }
            }
            ready
        };

        let count = ready.len();
        tracing::trace!(event = %kind, listeners = count, "emit");
        for callback in ready {
            callback.invoke(&event);
        }
        count
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("listeners", &self.entries.lock().len())
            .finish()
    }
}
