//! `cat` and `write` subcommands

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use evstream_core::prelude::*;

use crate::config::Config;

/// Counters collected while a command runs
#[derive(Debug, Default)]
pub struct Summary {
    pub bytes: AtomicU64,
    pub chunks: AtomicU64,
    pub drains: AtomicU64,
}

impl Summary {
    fn record_chunk(&self, len: usize) {
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn print(&self) {
        eprintln!(
            "evstream: {} bytes in {} chunks, {} drains",
            self.bytes.load(Ordering::Relaxed),
            self.chunks.load(Ordering::Relaxed),
            self.drains.load(Ordering::Relaxed),
        );
    }
}

/// Writable over `path`, or stdout when no path is given.
async fn open_sink(path: Option<&Path>) -> Result<Writable> {
    match path {
        Some(path) => {
            let transport = WriterTransport::file(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(Writable::new(transport))
        }
        None => Ok(Writable::new(WriterTransport::stdout())),
    }
}

pub async fn cat(config: &Config, output: Option<&Path>) -> Result<Arc<Summary>> {
    let input = Readable::new(ReaderTransport::stdin(config.read_chunk_size));
    let sink = open_sink(output).await?;
    pipe(input, sink).await
}

pub async fn write(output: Option<&Path>, lines: &[String]) -> Result<Arc<Summary>> {
    let sink = open_sink(output).await?;
    write_lines(sink, lines).await
}

fn count_drains(sink: &Writable, summary: &Arc<Summary>) {
    let summary = Arc::clone(summary);
    sink.on(EventKind::Drain, move |_| {
        summary.drains.fetch_add(1, Ordering::Relaxed);
    });
}

async fn failure(
    side: &str,
    errors: &mut UnboundedReceiver<StreamEvent>,
) -> Option<anyhow::Error> {
    match errors.recv().await? {
        StreamEvent::Error(err) => {
            Some(anyhow::Error::new(err).context(format!("{} stream failed", side)))
        }
        _ => None,
    }
}

/// Forward every chunk from `input` into `sink`, end `sink` when `input`
/// ends, and tear both down once `sink` finished.
pub async fn pipe(input: Readable, sink: Writable) -> Result<Arc<Summary>> {
    let summary = Arc::new(Summary::default());
    count_drains(&sink, &summary);

    {
        let sink = sink.clone();
        let summary = Arc::clone(&summary);
        input.on(EventKind::Data, move |event| {
            if let StreamEvent::Data(chunk) = event {
                summary.record_chunk(chunk.len());
                sink.write(chunk);
            }
        });
    }
    {
        let sink = sink.clone();
        input.once(EventKind::End, move |_| {
            debug!("input ended");
            sink.end();
        });
    }
    {
        let input = input.clone();
        let inner = sink.clone();
        sink.once(EventKind::Finish, move |_| {
            input.destroy();
            inner.destroy();
        });
    }

    let mut input_errors = input.subscribe(EventKind::Error);
    let mut sink_errors = sink.subscribe(EventKind::Error);
    let mut closed = sink.subscribe(EventKind::Close);

    info!(input = input.id(), output = sink.id(), "piping");
    let pumping = tokio::spawn(input.pump_until_end());

    let outcome = tokio::select! {
        Some(err) = failure("input", &mut input_errors) => Err(err),
        Some(err) = failure("output", &mut sink_errors) => Err(err),
        event = closed.recv() => match event {
            Some(_) => Ok(()),
            None => Err(anyhow!("output stream dropped before closing")),
        },
    };

    if outcome.is_err() {
        input.destroy();
        sink.destroy();
    }
    pumping.abort();
    outcome?;

    info!(bytes = summary.bytes.load(Ordering::Relaxed), "pipe complete");
    Ok(summary)
}

/// Write every line, newline terminated, then end and close `sink`.
pub async fn write_lines(sink: Writable, lines: &[String]) -> Result<Arc<Summary>> {
    let summary = Arc::new(Summary::default());
    count_drains(&sink, &summary);

    let mut errors = sink.subscribe(EventKind::Error);
    let mut finished = sink.subscribe(EventKind::Finish);
    let mut closed = sink.subscribe(EventKind::Close);

    for line in lines {
        sink.write(line);
        sink.write("\n");
        summary.record_chunk(line.len() + 1);
    }
    sink.end();

    tokio::select! {
        Some(err) = failure("output", &mut errors) => {
            sink.destroy();
            return Err(err);
        }
        event = finished.recv() => {
            if event.is_none() {
                bail!("output stream dropped before finishing");
            }
        }
    }

    sink.destroy();
    tokio::select! {
        Some(err) = failure("output", &mut errors) => return Err(err),
        _ = closed.recv() => {}
    }

    info!(lines = lines.len(), "write complete");
    Ok(summary)
}
