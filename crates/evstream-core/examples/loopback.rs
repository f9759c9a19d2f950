//! A duplex stream whose transport echoes every write back to its read side.
//!
//! Run with `cargo run -p evstream-core --example loopback`. Set `RUST_LOG`
//! to `debug` to see flush cycles.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use evstream_core::prelude::*;
use evstream_core::{ReadOutcome, TransportError};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Echo {
    pending: Mutex<VecDeque<Bytes>>,
    closed: Mutex<bool>,
    ready: Notify,
}

#[async_trait]
impl Transport for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn write(&self, data: Bytes) -> Result<(), TransportError> {
        self.pending.lock().push_back(data);
        self.ready.notify_waiters();
        Ok(())
    }

    async fn finalize(&self) -> Result<(), TransportError> {
        *self.closed.lock() = true;
        self.ready.notify_waiters();
        Ok(())
    }

    fn read(&self) -> Result<ReadOutcome, TransportError> {
        if let Some(chunk) = self.pending.lock().pop_front() {
            return Ok(ReadOutcome::Data(chunk));
        }
        if *self.closed.lock() {
            Ok(ReadOutcome::Eof)
        } else {
            Ok(ReadOutcome::Pending)
        }
    }

    async fn read_ready(&self) {
        loop {
            let notified = self.ready.notified();
            if !self.pending.lock().is_empty() || *self.closed.lock() {
                return;
            }
            notified.await;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let stream = Duplex::new(Echo::default());

    stream.on(EventKind::Data, |event| {
        if let StreamEvent::Data(chunk) = event {
            println!("echo: {}", String::from_utf8_lossy(chunk));
        }
    });
    stream.on(EventKind::Drain, |_| tracing::info!("write buffer drained"));
    stream.once(EventKind::Finish, |_| tracing::info!("write side finished"));
    let mut closed = stream.subscribe(EventKind::Close);

    let pumping = tokio::spawn(stream.pump_until_end());

    stream.write("hello");
    tokio::task::yield_now().await;
    stream.write(", ");
    stream.write("loopback");
    stream.end();

    match pumping.await {
        Ok(status) => tracing::info!(?status, "read side done"),
        Err(e) => tracing::error!(error = %e, "pump task failed"),
    }

    stream.destroy();
    closed.recv().await;
    tracing::info!(id = stream.id(), "stream closed");
}
