//! Transports over tokio I/O handles
//!
//! Standard input and output are plain instances of these, built by the
//! application and handed to a stream like any other transport.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stdout};
use tokio::task::JoinHandle;
use tracing::debug;

use super::inbox::Inbox;
use super::{ReadOutcome, Transport};
use crate::error::TransportError;

/// Default read size for [`ReaderTransport`]
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Write side over any `AsyncWrite`
pub struct WriterTransport<W> {
    name: String,
    writer: tokio::sync::Mutex<W>,
}

impl<W> WriterTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterTransport<Stdout> {
    pub fn stdout() -> Self {
        Self::new("stdout", tokio::io::stdout())
    }
}

impl WriterTransport<File> {
    /// Create (or truncate) `path` and write to it.
    pub async fn file(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let file = File::create(path).await?;
        Ok(Self::new(path.display().to_string(), file))
    }
}

#[async_trait]
impl<W> Transport for WriterTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn finalize(&self) -> Result<(), TransportError> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Read side over any `AsyncRead`.
///
/// A background task reads chunks of up to `chunk_size` bytes as they
/// arrive; `read` hands out whatever has been collected so far.
pub struct ReaderTransport {
    name: String,
    input: Arc<Inbox>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderTransport {
    /// Start reading from `reader`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new<R>(name: impl Into<String>, reader: R, chunk_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = name.into();
        let chunk_size = chunk_size.max(1);
        let input = Arc::new(Inbox::new());

        let task_input = input.clone();
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            let mut reader = reader;
            let limit = chunk_size as u64;
            let mut buf = BytesMut::with_capacity(chunk_size);
            loop {
                buf.reserve(chunk_size);
                match (&mut reader).take(limit).read_buf(&mut buf).await {
                    Ok(0) => {
                        debug!(transport = %task_name, "input reached eof");
                        task_input.close();
                        break;
                    }
                    Ok(_) => task_input.push(buf.split().freeze()),
                    Err(e) => {
                        debug!(transport = %task_name, error = %e, "input read failed");
                        task_input.fail(e);
                        break;
                    }
                }
            }
        });

        Self {
            name,
            input,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn stdin(chunk_size: usize) -> Self {
        Self::new("stdin", tokio::io::stdin(), chunk_size)
    }

    /// Read an already opened file.
    pub fn file(name: impl Into<String>, file: File, chunk_size: usize) -> Self {
        Self::new(name, file, chunk_size)
    }
}

#[async_trait]
impl Transport for ReaderTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.input.close();
        Ok(())
    }

    fn read(&self) -> Result<ReadOutcome, TransportError> {
        self.input.take()
    }

    async fn read_ready(&self) {
        self.input.ready().await;
    }
}

impl Drop for ReaderTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
