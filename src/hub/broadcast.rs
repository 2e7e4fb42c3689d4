//! Fan-out of tailed lines to every registered connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::error::{Error, TailError};
use crate::hub::{Enqueued, Registry};
use crate::shutdown::ShutdownSignal;

/// One line of the watched file.
#[derive(Debug, Clone)]
pub struct Line {
    /// 1-based position in the order the line source produced it.
    pub seq: u64,
    pub text: Arc<str>,
}

impl Line {
    pub fn new(seq: u64, text: impl Into<Arc<str>>) -> Self {
        Self {
            seq,
            text: text.into(),
        }
    }
}

/// Counts for a single broadcast pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Delivers lines to the connections in a [`Registry`].
///
/// Delivery only pushes onto each connection's bounded queue, so a slow
/// subscriber never holds up the others or the line source.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    lines: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            lines: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of lines broadcast so far.
    pub fn lines_broadcast(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn on_line(&self, line: &Line) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let failed = self.registry.broadcast(|conn| match conn.enqueue(&line.text)? {
            Enqueued::Queued => {
                report.delivered += 1;
                Ok(())
            }
            Enqueued::Dropped => {
                report.dropped += 1;
                Ok(())
            }
        });

        for (conn, err) in failed {
            tracing::warn!(
                conn_id = %conn.id(),
                remote = %conn.remote(),
                error = %err,
                "Error sending log to client"
            );
            if conn.finish_close(err.close_reason()) {
                report.closed += 1;
            }
        }

        if report.dropped > 0 {
            tracing::warn!(
                seq = line.seq,
                dropped = report.dropped,
                "Outbound queue full, line dropped for lagging clients"
            );
        }

        self.lines.store(line.seq, Ordering::Relaxed);
        report
    }
}

/// Drains the line source into the broadcaster until shutdown.
///
/// Per-line errors are logged and skipped. The source running dry is fatal.
pub async fn run_pump<S>(
    lines: S,
    broadcaster: Broadcaster,
    mut shutdown: ShutdownSignal,
) -> Result<(), Error>
where
    S: Stream<Item = Result<String, TailError>>,
{
    tokio::pin!(lines);
    let mut seq = broadcaster.lines_broadcast();

    tracing::debug!("Line pump started");

    loop {
        let next = tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!(lines = seq, "Line pump shutting down");
                return Ok(());
            }
            next = lines.next() => next,
        };

        match next {
            Some(Ok(text)) => {
                seq += 1;
                let report = broadcaster.on_line(&Line::new(seq, text));
                tracing::trace!(seq, delivered = report.delivered, "Line broadcast");
            }
            Some(Err(err)) if err.is_fatal() => return Err(err.into()),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "Error reading line");
            }
            None => return Err(Error::LineSourceEnded),
        }
    }
}
