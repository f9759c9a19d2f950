//! State shared by every stream: identity, events, transport and the destroy
//! lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::StreamError;
use crate::event::{EventChannel, StreamEvent};
use crate::lifecycle::{DestroyState, StateCell};
use crate::scheduler::Scheduler;
use crate::transport::Transport;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

pub struct StreamBase {
    id: u64,
    destroy_state: StateCell<DestroyState>,
    events: EventChannel,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
}

impl StreamBase {
    pub(crate) fn new(transport: Arc<dyn Transport>, scheduler: Scheduler) -> Arc<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        debug!(stream = id, transport = transport.name(), "stream created");
        Arc::new(Self {
            id,
            destroy_state: StateCell::new(DestroyState::Live),
            events: EventChannel::new(),
            transport,
            scheduler,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn destroy_state(&self) -> DestroyState {
        self.destroy_state.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroy_state() == DestroyState::Destroyed
    }

    pub(crate) fn emit_error(&self, error: StreamError) {
        self.events.emit(StreamEvent::Error(Arc::new(error)));
    }

    /// Release the transport. No-op once destroyed or while a destroy is
    /// already in flight.
    pub(crate) fn destroy(self: &Arc<Self>) {
        if !self
            .destroy_state
            .try_transition(DestroyState::Live, DestroyState::Destroying)
        {
            debug!(stream = self.id, state = ?self.destroy_state(), "destroy ignored");
            return;
        }

        let base = Arc::clone(self);
        self.scheduler.submit(async move {
            match base.transport.destroy().await {
                Ok(()) => base.after_destroy(),
                Err(source) => {
                    warn!(
                        stream = base.id,
                        transport = base.transport.name(),
                        error = %source,
                        "transport destroy failed"
                    );
                    // Back to live so a later destroy retries.
                    base.destroy_state
                        .try_transition(DestroyState::Destroying, DestroyState::Live);
                    base.emit_error(StreamError::Destroy { source });
                }
            }
        });
    }

    /// Mark the stream destroyed without going through the transport and
    /// emit `close`, once.
    pub(crate) fn after_destroy(&self) {
        let closed = self
            .destroy_state
            .try_transition(DestroyState::Live, DestroyState::Destroyed)
            || self
                .destroy_state
                .try_transition(DestroyState::Destroying, DestroyState::Destroyed);
        if closed {
            debug!(stream = self.id, "stream closed");
            self.events.emit(StreamEvent::Close);
        }
    }
}

impl fmt::Debug for StreamBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBase")
            .field("id", &self.id)
            .field("transport", &self.transport.name())
            .field("destroy_state", &self.destroy_state())
            .finish()
    }
}
