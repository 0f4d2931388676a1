use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::metrics::AggregatorMetrics;
use crate::session::SessionHandle;
use crate::writer::SharedWriter;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Outcome of closing a listener.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    /// Sessions that finished within the drain budget.
    pub drained: usize,
    /// Sessions still running at the deadline; their threads are detached.
    pub abandoned: usize,
    /// Whether this call closed the output. False on repeated closes.
    pub output_closed: bool,
}

/// Stops every session, waits for them against one shared deadline, then
/// closes the output exactly once whatever the sessions did.
pub(crate) fn drain(
    sessions: Vec<SessionHandle>,
    writer: &SharedWriter,
    timeout: Duration,
    metrics: &AggregatorMetrics,
) -> CloseReport {
    let deferred = sessions.iter().filter(|s| !s.request_close()).count();
    info!(
        sessions = sessions.len(),
        deferred,
        timeout_ms = timeout.as_millis() as u64,
        "Draining coverage sessions"
    );

    let deadline = Instant::now() + timeout;
    let mut pending = sessions;
    let mut drained = 0;
    loop {
        let (finished, running): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|s| s.is_finished());
        drained += finished.len();
        for session in finished {
            session.join();
        }
        pending = running;

        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        thread::sleep(DRAIN_POLL_INTERVAL);
    }

    let abandoned = pending.len();
    for session in pending {
        warn!(
            session = session.id(),
            "Session did not finish before drain timeout, abandoning"
        );
        session.force_close();
        metrics.record_session_abandoned();
    }

    let output_closed = match writer.close() {
        Ok(closed) => closed,
        Err(e) => {
            error!(path = %writer.path().display(), error = %e, "Failed to finalize coverage output");
            true
        }
    };

    info!(drained, abandoned, "Coverage output finalized");
    CloseReport {
        drained,
        abandoned,
        output_closed,
    }
}
