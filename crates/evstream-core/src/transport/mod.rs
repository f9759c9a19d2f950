//! Byte transports
//!
//! A [`Transport`] is the backend a stream hands its bytes to. Streams
//! reference their transport, they never own its lifetime: the application
//! builds one (stdout, a file, an in-memory double) and injects it.
//!
//! At most one stream should drive a given transport instance.

mod inbox;
pub mod io;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

pub use io::{ReaderTransport, WriterTransport};
pub use memory::{MemoryTransport, TransportCall};

/// Result of a non-blocking pull from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A chunk was available
    Data(Bytes),
    /// Nothing available right now
    Pending,
    /// The source is exhausted
    Eof,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Label used in log fields
    fn name(&self) -> &str {
        "transport"
    }

    /// Perform one write of the given bytes. Each call is atomic from the
    /// stream's point of view.
    async fn write(&self, _data: Bytes) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("write"))
    }

    /// Complete the write side once every buffered byte has been written.
    async fn finalize(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release the underlying resource.
    async fn destroy(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Pull whatever is available without blocking.
    fn read(&self) -> Result<ReadOutcome, TransportError> {
        Ok(ReadOutcome::Eof)
    }

    /// Wait until `read` may return something other than `Pending`.
    async fn read_ready(&self) {
        crate::scheduler::next_tick().await;
    }
}
