use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use covmerge_common::mutex_lock_or_recover;
use tracing::{debug, error, info, warn};

use crate::config::AggregatorConfig;
use crate::error::DaemonError;
use crate::metrics::{AggregatorMetrics, MetricsSnapshot};
use crate::session::{spawn_session, SessionHandle};
use crate::shutdown::{drain, CloseReport};
use crate::writer::SharedWriter;

/// Loopback endpoint that agents in `tcpclient` mode connect to.
///
/// The port is known as soon as [`CoverageListener::start`] returns, so it can
/// be forwarded to sandboxes before any of them is spawned. Every accepted
/// connection gets its own reader thread; all of them append to one
/// [`SharedWriter`].
pub struct CoverageListener {
    addr: SocketAddr,
    writer: Arc<SharedWriter>,
    metrics: Arc<AggregatorMetrics>,
    config: AggregatorConfig,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<Vec<SessionHandle>>>>,
}

impl CoverageListener {
    pub fn start(output: &Path, config: AggregatorConfig) -> Result<Self, DaemonError> {
        let listener = bind_loopback()?;
        let addr = listener.local_addr()?;

        let writer = Arc::new(SharedWriter::open(output, config.write_buffer_bytes)?);
        let metrics = Arc::new(AggregatorMetrics::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_loop = AcceptLoop {
            listener,
            writer: Arc::clone(&writer),
            metrics: Arc::clone(&metrics),
            shutdown: Arc::clone(&shutdown),
            config: config.clone(),
        };
        let accept_thread = thread::Builder::new()
            .name("coverage-accept".to_string())
            .spawn(move || accept_loop.run())
            .map_err(|source| DaemonError::ThreadSpawn {
                name: "coverage-accept".to_string(),
                source,
            })?;

        info!(port = addr.port(), output = %output.display(), "Coverage listener started");

        Ok(Self {
            addr,
            writer,
            metrics,
            config,
            shutdown,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn output_path(&self) -> &Path {
        self.writer.path()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        mutex_lock_or_recover(&self.accept_thread).is_none()
    }

    /// Stops accepting, drains sessions within the configured budget and
    /// finalizes the output. Safe to call more than once; later calls return
    /// an empty report.
    pub fn close(&self) -> CloseReport {
        let Some(accept_thread) = mutex_lock_or_recover(&self.accept_thread).take() else {
            return CloseReport::default();
        };

        info!(port = self.port(), "Closing coverage listener");
        self.shutdown.store(true, Ordering::SeqCst);

        let sessions = accept_thread.join().unwrap_or_else(|_| {
            error!("Accept loop panicked; no sessions to drain");
            Vec::new()
        });

        drain(
            sessions,
            &self.writer,
            self.config.drain_timeout,
            &self.metrics,
        )
    }
}

impl Drop for CoverageListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn bind_loopback() -> Result<TcpListener, DaemonError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let bind_err = |source| DaemonError::Bind {
        addr: addr.to_string(),
        source,
    };

    let listener = TcpListener::bind(addr).map_err(bind_err)?;
    listener.set_nonblocking(true).map_err(bind_err)?;
    Ok(listener)
}

struct AcceptLoop {
    listener: TcpListener,
    writer: Arc<SharedWriter>,
    metrics: Arc<AggregatorMetrics>,
    shutdown: Arc<AtomicBool>,
    config: AggregatorConfig,
}

impl AcceptLoop {
    /// Accepts until shutdown, then hands the session registry back to the
    /// closing thread. The endpoint is dropped on return.
    ///
    /// The shutdown flag is only checked once the backlog is empty: agents
    /// that connected before `close` get a session and go through the drain
    /// like everyone else.
    fn run(self) -> Vec<SessionHandle> {
        let mut sessions: Vec<SessionHandle> = Vec::new();
        let mut next_id = 1u64;

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.metrics.record_connection();
                    let id = next_id;
                    next_id += 1;
                    debug!(session = id, peer = %peer, "Accepted coverage connection");

                    match spawn_session(
                        id,
                        stream,
                        peer,
                        Arc::clone(&self.writer),
                        Arc::clone(&self.metrics),
                    ) {
                        Ok(handle) => sessions.push(handle),
                        Err(e) => {
                            self.metrics.record_session_failed();
                            error!(session = id, error = %e, "Failed to start coverage session");
                        }
                    }
                    prune_finished(&mut sessions);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    thread::sleep(self.config.accept_poll_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "Error accepting coverage connection");
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    thread::sleep(self.config.accept_poll_interval);
                }
            }
        }

        debug!(sessions = sessions.len(), "Accept loop stopped");
        sessions
    }
}

fn prune_finished(sessions: &mut Vec<SessionHandle>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        std::mem::take(sessions).into_iter().partition(|s| s.is_finished());
    for session in finished {
        session.join();
    }
    *sessions = running;
}
