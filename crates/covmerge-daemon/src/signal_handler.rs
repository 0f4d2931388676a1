//! Stop signals for a long-running `covmerge serve`.
//!
//! The first SIGINT or SIGTERM raises the listener's shutdown flag and is
//! remembered, so the close summary can say what ended the run.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

use crate::error::DaemonError;

const NONE: i32 = 0;

/// A signal that asks `serve` to close the coverage listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            SIGINT => Some(StopSignal::Interrupt),
            SIGTERM => Some(StopSignal::Terminate),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
        }
    }
}

/// Watches for stop signals on a dedicated thread until dropped.
pub struct SignalHandler {
    received: Arc<AtomicI32>,
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalHandler {
    /// Installs the handlers. `shutdown` is set once the first stop signal
    /// arrives; later signals are logged and otherwise ignored.
    pub fn setup(shutdown: Arc<AtomicBool>) -> Result<Self, DaemonError> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;
        let handle = signals.handle();
        let received = Arc::new(AtomicI32::new(NONE));

        let seen = Arc::clone(&received);
        let thread = thread::Builder::new()
            .name("covmerge-signals".to_string())
            .spawn(move || {
                for raw in signals.forever() {
                    let Some(signal) = StopSignal::from_raw(raw) else {
                        continue;
                    };
                    if seen
                        .compare_exchange(NONE, raw, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        info!(signal = signal.name(), "Stop requested, closing coverage listener");
                        shutdown.store(true, Ordering::SeqCst);
                    } else {
                        debug!(signal = signal.name(), "Coverage listener already closing");
                    }
                }
            })
            .map_err(|e| {
                DaemonError::SignalSetup(format!("failed to spawn signal watcher: {}", e))
            })?;

        Ok(Self {
            received,
            handle,
            thread: Some(thread),
        })
    }

    /// The first stop signal seen, if any.
    pub fn received(&self) -> Option<StopSignal> {
        StopSignal::from_raw(self.received.load(Ordering::SeqCst))
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
