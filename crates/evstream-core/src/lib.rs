//! Event-driven byte streams
//!
//! Readable, writable and duplex streams that report their lifecycle through
//! named events (`data`, `end`, `drain`, `finish`, `close`, `error`) and hand
//! their bytes to an injected [`Transport`].
//!
//! ```no_run
//! use evstream_core::prelude::*;
//!
//! # async fn run() {
//! let out = Writable::new(WriterTransport::stdout());
//! out.once(EventKind::Finish, |_| tracing::info!("done"));
//! out.write("hello ");
//! out.end_with("world\n");
//! # }
//! ```

pub mod error;
pub mod event;
pub mod lifecycle;
pub mod scheduler;
pub mod stream;
pub mod transport;

pub use error::{StreamError, TransportError};
pub use event::{EventChannel, EventKind, ListenerId, StreamEvent};
pub use lifecycle::{DestroyState, ReadState, WriteState};
pub use scheduler::Scheduler;
pub use stream::{
    Duplex, PumpStatus, Readable, ReadableStream, Stream, Writable, WritableStream,
};
pub use transport::{
    MemoryTransport, ReadOutcome, ReaderTransport, Transport, TransportCall, WriterTransport,
};

/// Everything needed to build and drive streams.
pub mod prelude {
    pub use crate::event::{EventKind, StreamEvent};
    pub use crate::stream::{
        Duplex, PumpStatus, Readable, ReadableStream, Stream, Writable, WritableStream,
    };
    pub use crate::transport::{MemoryTransport, ReaderTransport, Transport, WriterTransport};
    pub use crate::StreamError;
}
