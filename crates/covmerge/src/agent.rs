//! Handle to the coverage agent running inside this process, if any.
//!
//! Whoever starts the agent registers it with [`install`]; everything else
//! asks for it with [`agent`] and copes with it being absent.

use std::collections::BTreeMap;
use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use covmerge_common::mutex_lock_or_recover;
use covmerge_exec::{Block, ExecDataReader, ExecDataWriter, ExecutionData, SessionInfo};
use tracing::{debug, info};

use crate::error::CoverageError;
use crate::settings::Filters;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub trait CoverageAgent: Send + Sync {
    /// Where the agent was loaded from, when it came from a file.
    fn location(&self) -> Option<PathBuf>;

    fn includes(&self) -> String;

    fn excludes(&self) -> String;

    /// Dumps everything recorded so far to the agent's output, optionally
    /// resetting the probes afterwards.
    fn write_execution_data(&self, reset: bool) -> Result<(), CoverageError>;

    /// Final dump, then releases the output.
    fn shutdown(&self) -> Result<(), CoverageError>;
}

static LOCAL_AGENT: OnceLock<Arc<dyn CoverageAgent>> = OnceLock::new();

pub fn install(agent: Arc<dyn CoverageAgent>) -> Result<(), CoverageError> {
    LOCAL_AGENT
        .set(agent)
        .map_err(|_| CoverageError::AgentAlreadyInstalled)
}

pub fn agent() -> Option<Arc<dyn CoverageAgent>> {
    LOCAL_AGENT.get().cloned()
}

pub fn required_agent() -> Result<Arc<dyn CoverageAgent>, CoverageError> {
    agent().ok_or(CoverageError::AgentUnavailable)
}

/// Build-finished hook: dump without reset so a sandboxed build reports its
/// coverage before the process exits. Returns false when no agent is installed.
pub fn flush_on_finish() -> Result<bool, CoverageError> {
    match agent() {
        Some(agent) => {
            agent.write_execution_data(false)?;
            Ok(true)
        }
        None => {
            debug!("No local coverage agent, nothing to flush");
            Ok(false)
        }
    }
}

struct Connection {
    stream: TcpStream,
    writer: ExecDataWriter<TcpStream>,
}

/// Agent side of the remote-control protocol in `tcpclient` mode.
///
/// Probe hits are recorded in memory and sent to the listener on every
/// [`CoverageAgent::write_execution_data`], followed by `CMD_OK`.
pub struct TcpClientAgent {
    addr: SocketAddr,
    session_id: String,
    filters: Filters,
    start: i64,
    store: Mutex<BTreeMap<u64, ExecutionData>>,
    connection: Mutex<Option<Connection>>,
}

impl TcpClientAgent {
    /// Connects and exchanges headers with the listener at `addr`.
    pub fn connect(
        addr: SocketAddr,
        session_id: impl Into<String>,
        filters: Filters,
    ) -> Result<Self, CoverageError> {
        let handshake_err = |reason: String| CoverageError::Handshake {
            addr: addr.to_string(),
            reason,
        };

        let stream = TcpStream::connect_timeout(&addr, HANDSHAKE_TIMEOUT)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        let writer = ExecDataWriter::with_header(stream.try_clone()?)?;

        let mut reader = ExecDataReader::new(BufReader::new(&stream));
        match reader.next_block() {
            Ok(Some(Block::Header { .. })) => {}
            Ok(Some(other)) => {
                return Err(handshake_err(format!(
                    "unexpected block 0x{:02x}",
                    other.kind()
                )))
            }
            Ok(None) => return Err(handshake_err("connection closed".to_string())),
            Err(e) => return Err(handshake_err(e.to_string())),
        }
        stream.set_read_timeout(None)?;

        let session_id = session_id.into();
        info!(addr = %addr, session = %session_id, "Connected coverage agent");
        Ok(Self {
            addr,
            session_id,
            filters,
            start: Utc::now().timestamp_millis(),
            store: Mutex::new(BTreeMap::new()),
            connection: Mutex::new(Some(Connection { stream, writer })),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Marks `hits` as executed in the probe vector of a class, creating the
    /// class entry with `probe_count` probes on first use.
    pub fn record_hits(&self, class_id: u64, name: &str, probe_count: usize, hits: &[usize]) {
        let mut store = mutex_lock_or_recover(&self.store);
        let data = store
            .entry(class_id)
            .or_insert_with(|| ExecutionData::new(class_id, name, vec![false; probe_count]));
        for &probe in hits {
            if let Some(slot) = data.probes.get_mut(probe) {
                *slot = true;
            }
        }
    }

    fn snapshot(&self) -> Vec<ExecutionData> {
        let store = mutex_lock_or_recover(&self.store);
        store.values().filter(|d| d.has_hits()).cloned().collect()
    }

    /// Clears the probes that went out in `sent`. Runs only once the listener
    /// has the dump, so a failed send keeps the hits for the next one.
    fn reset_sent(&self, sent: &[ExecutionData]) {
        let mut store = mutex_lock_or_recover(&self.store);
        for record in sent {
            let Some(data) = store.get_mut(&record.id) else {
                continue;
            };
            for (probe, &was_sent) in data.probes.iter_mut().zip(&record.probes) {
                if was_sent {
                    *probe = false;
                }
            }
        }
    }
}

impl CoverageAgent for TcpClientAgent {
    fn location(&self) -> Option<PathBuf> {
        None
    }

    fn includes(&self) -> String {
        self.filters.includes.clone()
    }

    fn excludes(&self) -> String {
        self.filters.excludes.clone()
    }

    fn write_execution_data(&self, reset: bool) -> Result<(), CoverageError> {
        let mut connection = mutex_lock_or_recover(&self.connection);
        let Some(conn) = connection.as_mut() else {
            debug!(session = %self.session_id, "Agent connection closed, skipping dump");
            return Ok(());
        };

        let records = self.snapshot();
        let info = SessionInfo::new(&self.session_id, self.start, Utc::now().timestamp_millis());
        conn.writer.write_session_info(&info)?;
        for data in &records {
            conn.writer.write_execution_data(data)?;
        }
        conn.writer.send_cmd_ok()?;
        conn.writer.flush()?;
        if reset {
            self.reset_sent(&records);
        }

        debug!(session = %self.session_id, records = records.len(), reset, "Dumped execution data");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), CoverageError> {
        self.write_execution_data(false)?;
        if let Some(conn) = mutex_lock_or_recover(&self.connection).take() {
            let _ = conn.stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covmerge_exec::Block;
    use std::net::TcpListener;
    use std::thread;

    /// Accepts one connection, answers the handshake and collects every
    /// block until the agent disconnects.
    fn collector() -> (SocketAddr, thread::JoinHandle<Vec<Block>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            ExecDataWriter::with_header(stream.try_clone().unwrap()).unwrap();
            ExecDataReader::new(stream)
                .map_while(Result::ok)
                .collect()
        });
        (addr, handle)
    }

    #[test]
    fn test_dump_sends_hit_classes_then_cmd_ok() {
        let (addr, collected) = collector();
        let agent = TcpClientAgent::connect(addr, "it-1", Filters::new("*", "")).unwrap();

        agent.record_hits(1, "pkg/Hit", 4, &[0, 3]);
        agent.record_hits(2, "pkg/NotHit", 2, &[]);
        agent.shutdown().unwrap();

        let blocks = collected.join().unwrap();
        assert!(matches!(blocks[0], Block::Header { .. }));
        assert!(matches!(&blocks[1], Block::SessionInfo(info) if info.id == "it-1"));
        assert_eq!(
            blocks[2],
            Block::ExecutionData(ExecutionData::new(1, "pkg/Hit", vec![true, false, false, true]))
        );
        assert_eq!(blocks[3], Block::CmdOk);
        assert_eq!(blocks.len(), 4);
    }

    #[test]
    fn test_reset_clears_probes() {
        let (addr, collected) = collector();
        let agent = TcpClientAgent::connect(addr, "it-2", Filters::new("*", "")).unwrap();

        agent.record_hits(1, "pkg/A", 2, &[1]);
        agent.write_execution_data(true).unwrap();
        agent.shutdown().unwrap();

        let blocks = collected.join().unwrap();
        let records = blocks
            .iter()
            .filter(|b| matches!(b, Block::ExecutionData(_)))
            .count();
        // The second dump has nothing left after the reset.
        assert_eq!(records, 1);
        assert_eq!(blocks.iter().filter(|b| **b == Block::CmdOk).count(), 2);
    }

    #[test]
    fn test_failed_dump_keeps_hits_for_next_dump() {
        let (addr, _collected) = collector();
        let agent = TcpClientAgent::connect(addr, "it-6", Filters::new("*", "")).unwrap();
        agent.record_hits(1, "pkg/A", 3, &[0, 2]);

        mutex_lock_or_recover(&agent.connection)
            .as_ref()
            .unwrap()
            .stream
            .shutdown(Shutdown::Write)
            .unwrap();
        assert!(agent.write_execution_data(true).is_err());

        let kept = agent.snapshot();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].probes, vec![true, false, true]);
    }

    #[test]
    fn test_out_of_range_hits_are_ignored() {
        let (addr, _collected) = collector();
        let agent = TcpClientAgent::connect(addr, "it-3", Filters::new("*", "")).unwrap();
        agent.record_hits(5, "pkg/Small", 1, &[0, 7]);
        assert_eq!(agent.snapshot()[0].probes, vec![true]);
        agent.shutdown().unwrap();
    }

    #[test]
    fn test_dump_after_shutdown_is_noop() {
        let (addr, _collected) = collector();
        let agent = TcpClientAgent::connect(addr, "it-4", Filters::new("*", "")).unwrap();
        agent.shutdown().unwrap();
        assert!(agent.write_execution_data(false).is_ok());
    }

    #[test]
    fn test_handshake_rejects_non_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            use std::io::Write;
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").unwrap();
        });

        let result = TcpClientAgent::connect(addr, "x", Filters::new("*", ""));
        assert!(matches!(result, Err(CoverageError::Handshake { .. })));
        server.join().unwrap();
    }

    #[test]
    fn test_filters_are_reported_verbatim() {
        let (addr, _collected) = collector();
        let agent =
            TcpClientAgent::connect(addr, "it-5", Filters::new("com.a.*:com.b.*", "*Test"))
                .unwrap();
        assert_eq!(agent.includes(), "com.a.*:com.b.*");
        assert_eq!(agent.excludes(), "*Test");
        assert!(agent.location().is_none());
        agent.shutdown().unwrap();
    }
}
