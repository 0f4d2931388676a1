use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use covmerge_common::mutex_lock_or_recover;
use covmerge_exec::{Block, ExecError};
use tracing::{debug, error};

use crate::error::DaemonError;

/// The merged execution-data output shared by every session.
///
/// Callers only get whole-block `append`, `flush` and a one-shot `close`; the
/// stream itself never leaves the lock. Blocks are encoded before the lock is
/// taken and written with a single `write_all`, so concurrent sessions never
/// interleave partial records.
pub struct SharedWriter {
    path: PathBuf,
    inner: Mutex<Option<BufWriter<File>>>,
}

impl SharedWriter {
    /// Opens `path` for appending, creating it and its parent directory when
    /// missing, and writes a header block so the appended section is a valid
    /// execution-data stream on its own.
    pub fn open(path: &Path, buffer_bytes: usize) -> Result<Self, DaemonError> {
        let open_err = |source| DaemonError::OutputOpen {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        let mut out = BufWriter::with_capacity(buffer_bytes, file);
        out.write_all(&Block::header().encode()?)
            .and_then(|_| out.flush())
            .map_err(open_err)?;

        debug!(path = %path.display(), "Opened coverage output");
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Some(out)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one session-info or execution-data block.
    pub fn append(&self, block: &Block) -> Result<(), DaemonError> {
        if block.is_command() {
            return Err(ExecError::UnexpectedBlock(block.kind()).into());
        }
        let bytes = block.encode()?;

        let mut guard = mutex_lock_or_recover(&self.inner);
        let out = guard.as_mut().ok_or(DaemonError::WriterClosed)?;
        if let Err(e) = out.write_all(&bytes) {
            self.poison(&mut guard, &e);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), DaemonError> {
        let mut guard = mutex_lock_or_recover(&self.inner);
        let out = guard.as_mut().ok_or(DaemonError::WriterClosed)?;
        if let Err(e) = out.flush() {
            self.poison(&mut guard, &e);
            return Err(e.into());
        }
        Ok(())
    }

    /// A failed write may have left part of a block in the file; nothing may
    /// follow it, so the stream is dropped and later calls see `WriterClosed`.
    fn poison(&self, slot: &mut Option<BufWriter<File>>, cause: &io::Error) {
        slot.take();
        error!(
            path = %self.path.display(),
            error = %cause,
            "Write to coverage output failed, rejecting further blocks"
        );
    }

    /// Flushes and releases the file. Returns `Ok(false)` when an earlier
    /// call already closed it or a failed write dropped it.
    pub fn close(&self) -> Result<bool, DaemonError> {
        let taken = mutex_lock_or_recover(&self.inner).take();
        let Some(out) = taken else {
            return Ok(false);
        };

        let file = out.into_inner().map_err(|e| DaemonError::Io(e.into_error()))?;
        file.sync_all()?;
        debug!(path = %self.path.display(), "Closed coverage output");
        Ok(true)
    }

    pub fn is_closed(&self) -> bool {
        mutex_lock_or_recover(&self.inner).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covmerge_exec::{read_exec_file, ExecutionData, SessionInfo};
    use std::sync::Arc;
    use std::thread;

    fn record(name: &str) -> Block {
        Block::from(ExecutionData::new(1, name, vec![true, false, true]))
    }

    #[test]
    fn test_open_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exec");
        let writer = SharedWriter::open(&path, 1024).unwrap();
        writer.close().unwrap();

        let file = read_exec_file(&path).unwrap();
        assert_eq!(file.headers, 1);
        assert!(file.records.is_empty());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.exec");
        SharedWriter::open(&path, 1024).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exec");

        let first = SharedWriter::open(&path, 1024).unwrap();
        first.append(&record("pkg/A")).unwrap();
        first.close().unwrap();

        let second = SharedWriter::open(&path, 1024).unwrap();
        second.append(&record("pkg/A")).unwrap();
        second.close().unwrap();

        let file = read_exec_file(&path).unwrap();
        assert_eq!(file.headers, 2);
        assert_eq!(file.records_for("pkg/A").count(), 2);
    }

    #[test]
    fn test_flush_makes_records_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exec");
        let writer = SharedWriter::open(&path, 64 * 1024).unwrap();

        writer
            .append(&Block::from(SessionInfo::new("s", 1, 2)))
            .unwrap();
        writer.append(&record("pkg/A")).unwrap();
        writer.flush().unwrap();

        let file = read_exec_file(&path).unwrap();
        assert_eq!(file.sessions.len(), 1);
        assert_eq!(file.records.len(), 1);
    }

    #[test]
    fn test_close_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SharedWriter::open(&dir.path().join("out.exec"), 1024).unwrap();

        assert!(writer.close().unwrap());
        assert!(!writer.close().unwrap());
        assert!(writer.is_closed());
        assert!(matches!(
            writer.append(&record("pkg/A")),
            Err(DaemonError::WriterClosed)
        ));
        assert!(matches!(writer.flush(), Err(DaemonError::WriterClosed)));
    }

    #[test]
    fn test_commands_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SharedWriter::open(&dir.path().join("out.exec"), 1024).unwrap();
        assert!(matches!(
            writer.append(&Block::CmdOk),
            Err(DaemonError::Codec(ExecError::UnexpectedBlock(0x20)))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_rejects_later_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exec");
        let writer = SharedWriter::open(&path, 1024).unwrap();

        // Swap in a device that fails every write with ENOSPC; a small buffer
        // makes the record go straight to it.
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        *writer.inner.lock().unwrap() = Some(BufWriter::with_capacity(8, full));

        assert!(matches!(writer.append(&record("pkg/A")), Err(DaemonError::Io(_))));
        assert!(writer.is_closed());
        assert!(matches!(
            writer.append(&record("pkg/B")),
            Err(DaemonError::WriterClosed)
        ));
        assert!(matches!(writer.flush(), Err(DaemonError::WriterClosed)));
        assert!(!writer.close().unwrap());
    }

    #[test]
    fn test_concurrent_appends_are_not_interleaved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.exec");
        // Small buffer forces many underlying writes.
        let writer = Arc::new(SharedWriter::open(&path, 16).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for i in 0..50 {
                        let probes = vec![i % 2 == 0; 100 + t];
                        let name = format!("pkg/T{}C{}", t, i);
                        writer
                            .append(&Block::from(ExecutionData::new(i as u64, name, probes)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        writer.close().unwrap();

        let file = read_exec_file(&path).unwrap();
        assert_eq!(file.records.len(), 8 * 50);
        for record in &file.records {
            let t: usize = record.name[5..record.name.find('C').unwrap()]
                .parse()
                .unwrap();
            assert_eq!(record.probes.len(), 100 + t);
        }
    }
}
