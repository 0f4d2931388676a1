//! One thread per accepted agent connection.
//!
//! A session reader answers the agent's handshake, relays session-info and
//! execution-data blocks into the shared output, and flushes it whenever the
//! agent reports a finished dump with `CMD_OK`.

use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use covmerge_common::mutex_lock_or_recover;
use covmerge_exec::{Block, ExecDataReader, ExecDataWriter};
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::metrics::AggregatorMetrics;
use crate::writer::SharedWriter;

#[derive(Debug, Default)]
struct Phase {
    transmitting: bool,
    close_requested: bool,
}

/// In-flight state shared between a reader and the shutdown coordinator.
///
/// Both sides decide under the same lock, so a close request either closes
/// an idle socket right away or is picked up by the reader after its flush.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    phase: Mutex<Phase>,
}

impl SessionState {
    fn begin_transmission(&self) {
        mutex_lock_or_recover(&self.phase).transmitting = true;
    }

    /// Clears the transmitting flag; returns whether a close is pending.
    fn end_transmission(&self) -> bool {
        let mut phase = mutex_lock_or_recover(&self.phase);
        phase.transmitting = false;
        phase.close_requested
    }

    /// Marks the session for closing. When it is idle, `close_now` runs while
    /// the lock is still held and true is returned; otherwise the reader
    /// closes after its next flush.
    fn request_close(&self, close_now: impl FnOnce()) -> bool {
        let mut phase = mutex_lock_or_recover(&self.phase);
        phase.close_requested = true;
        if phase.transmitting {
            return false;
        }
        close_now();
        true
    }

    fn is_transmitting(&self) -> bool {
        mutex_lock_or_recover(&self.phase).transmitting
    }
}

/// What a session contributed, logged when it ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionSummary {
    pub session_infos: u64,
    pub records: u64,
    pub dumps: u64,
}

pub(crate) struct SessionHandle {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    state: Arc<SessionState>,
    thread: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Asks the session to stop. Idle sessions are closed immediately;
    /// a session mid-transmission closes itself after its next flush.
    /// Returns false when the close was deferred.
    pub fn request_close(&self) -> bool {
        let closed = self.state.request_close(|| {
            let _ = self.stream.shutdown(Shutdown::Both);
        });
        if !closed {
            debug!(session = self.id, "Session mid-transmission, deferring close");
        }
        closed
    }

    pub fn force_close(&self) {
        warn!(
            session = self.id,
            peer = %self.peer,
            transmitting = self.state.is_transmitting(),
            "Forcing session socket closed"
        );
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!(session = self.id, "Session reader panicked");
        }
    }
}

/// Spawns the reader thread for a freshly accepted connection.
pub(crate) fn spawn_session(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    writer: Arc<SharedWriter>,
    metrics: Arc<AggregatorMetrics>,
) -> Result<SessionHandle, DaemonError> {
    // Accepted sockets must block; the listener itself polls.
    stream.set_nonblocking(false)?;
    let control = stream.try_clone()?;
    let state = Arc::new(SessionState::default());

    let reader = SessionReader {
        id,
        peer,
        stream,
        state: Arc::clone(&state),
        writer,
        metrics,
    };

    let name = format!("coverage-session-{}", id);
    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || reader.run())
        .map_err(|source| DaemonError::ThreadSpawn { name, source })?;

    Ok(SessionHandle {
        id,
        peer,
        stream: control,
        state,
        thread,
    })
}

struct SessionReader {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    state: Arc<SessionState>,
    writer: Arc<SharedWriter>,
    metrics: Arc<AggregatorMetrics>,
}

impl SessionReader {
    fn run(self) {
        debug!(session = self.id, peer = %self.peer, "Coverage session started");

        match self.serve() {
            Ok(summary) => {
                self.metrics.record_session_completed();
                info!(
                    session = self.id,
                    session_infos = summary.session_infos,
                    records = summary.records,
                    dumps = summary.dumps,
                    "Coverage session finished"
                );
            }
            Err(e) if e.is_disconnect() => {
                self.metrics.record_session_completed();
                debug!(session = self.id, error = %e, "Coverage session disconnected");
            }
            Err(e) => {
                self.metrics.record_session_failed();
                warn!(session = self.id, peer = %self.peer, error = %e, "Coverage session ended with error");
            }
        }

        match self.writer.flush() {
            Ok(()) | Err(DaemonError::WriterClosed) => {}
            Err(e) => warn!(session = self.id, error = %e, "Failed to flush coverage output"),
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn serve(&self) -> Result<SessionSummary, DaemonError> {
        let mut summary = SessionSummary::default();

        // Handshake: announce ourselves as a remote-control peer. An agent
        // that dumped and hung up while still in the backlog never reads it,
        // but what it sent is still queued on our side.
        let mut commands = ExecDataWriter::new(&self.stream);
        if let Err(e) = commands.write_header() {
            debug!(session = self.id, error = %e, "Handshake not delivered, reading queued blocks");
        }

        let mut reader = ExecDataReader::new(BufReader::new(&self.stream));
        while let Some(block) = reader.next_block()? {
            match &block {
                Block::Header { .. } => {}
                Block::SessionInfo(info) => {
                    self.state.begin_transmission();
                    self.writer.append(&block)?;
                    self.metrics.record_session_info();
                    summary.session_infos += 1;
                    debug!(session = self.id, agent_session = %info.id, "Received session info");
                }
                Block::ExecutionData(_) => {
                    self.state.begin_transmission();
                    self.writer.append(&block)?;
                    self.metrics.record_execution_data();
                    summary.records += 1;
                }
                Block::CmdOk => {
                    self.writer.flush()?;
                    self.metrics.record_flush();
                    summary.dumps += 1;
                    if self.state.end_transmission() {
                        debug!(session = self.id, "Close requested, ending session after flush");
                        break;
                    }
                }
                Block::CmdDump { .. } => {
                    // Nothing is buffered on this side, so a dump request is
                    // answered right away.
                    commands.send_cmd_ok()?;
                }
            }
        }
        Ok(summary)
    }
}
