//! Listener startup and output errors.
//!
//! Only bind and output failures reach callers; a failing session is logged
//! and counted, never propagated.

use std::io;
use std::path::PathBuf;

use covmerge_exec::ExecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to bind coverage listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Failed to open coverage output {path}: {source}")]
    OutputOpen { path: PathBuf, source: io::Error },

    #[error("Coverage output is already closed")]
    WriterClosed,

    #[error("Coverage output I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Execution data error: {0}")]
    Codec(#[from] ExecError),

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn { name: String, source: io::Error },

    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),
}

impl DaemonError {
    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            DaemonError::Bind { .. } => {
                "Check that the loopback interface is available and ephemeral ports are not exhausted."
                    .to_string()
            }
            DaemonError::OutputOpen { path, .. } => format!(
                "Check that {} is writable and its parent directory exists.",
                path.display()
            ),
            DaemonError::WriterClosed => {
                "The listener was already closed; start a new one for another run.".to_string()
            }
            DaemonError::Io(_) => "Check free disk space for the coverage output.".to_string(),
            DaemonError::Codec(_) => {
                "The agent sent data in an unexpected format. Check the agent version.".to_string()
            }
            DaemonError::ThreadSpawn { .. } => {
                "The process may have hit its thread limit. Reduce parallel test forks.".to_string()
            }
            DaemonError::SignalSetup(_) => {
                "Signal handling is unavailable; bound the run with `serve --duration <SECS>`."
                    .to_string()
            }
        }
    }

    /// Returns whether this error is potentially transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DaemonError::Bind { .. } | DaemonError::ThreadSpawn { .. })
    }

    /// True when the underlying cause is the peer going away.
    pub fn is_disconnect(&self) -> bool {
        let kind = match self {
            DaemonError::Io(e) => e.kind(),
            DaemonError::Codec(ExecError::Io(e)) => e.kind(),
            _ => return false,
        };
        matches!(
            kind,
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = DaemonError::Bind {
            addr: "127.0.0.1:0".into(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to bind coverage listener on 127.0.0.1:0: in use"
        );
        assert_eq!(
            DaemonError::WriterClosed.to_string(),
            "Coverage output is already closed"
        );
    }

    #[test]
    fn test_suggestion_mentions_path() {
        let err = DaemonError::OutputOpen {
            path: PathBuf::from("/nope/out.exec"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.suggestion().contains("/nope/out.exec"));
    }

    #[test]
    fn test_signal_setup_suggests_bounded_serve() {
        let err = DaemonError::SignalSetup("no signals".to_string());
        let suggestion = err.suggestion();
        assert!(suggestion.contains("--duration"));
        assert!(!suggestion.contains("stdin"));
    }

    #[test]
    fn test_is_disconnect() {
        let eof = ExecError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(DaemonError::Codec(eof).is_disconnect());
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(DaemonError::Io(reset).is_disconnect());
        assert!(!DaemonError::Codec(ExecError::UnknownBlock(3)).is_disconnect());
        assert!(!DaemonError::WriterClosed.is_disconnect());
    }

    #[test]
    fn test_is_retryable() {
        assert!(!DaemonError::WriterClosed.is_retryable());
        assert!(DaemonError::ThreadSpawn {
            name: "x".into(),
            source: io::Error::other("limit"),
        }
        .is_retryable());
    }
}
