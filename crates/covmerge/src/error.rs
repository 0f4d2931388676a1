use std::io;
use std::path::PathBuf;

use covmerge_daemon::DaemonError;
use covmerge_exec::ExecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("Coverage recorder has not been started")]
    RecorderNotStarted,

    #[error("No local coverage agent is available")]
    AgentUnavailable,

    #[error("A local coverage agent is already installed")]
    AgentAlreadyInstalled,

    #[error("Agent handshake with {addr} failed: {reason}")]
    Handshake { addr: String, reason: String },

    #[error("Failed to update {path}: {source}")]
    Forward { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoverageError {
    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            CoverageError::RecorderNotStarted => {
                "Start the recorder before spawning sandboxes that need its port.".to_string()
            }
            CoverageError::AgentUnavailable => {
                "Install a local agent first, or run without a local agent.".to_string()
            }
            CoverageError::AgentAlreadyInstalled => {
                "Only one local agent can be installed per process.".to_string()
            }
            CoverageError::Handshake { .. } => {
                "Check that the port belongs to a running covmerge listener.".to_string()
            }
            CoverageError::Forward { path, .. } => {
                format!("Check that {} exists and is writable.", path.display())
            }
            CoverageError::Daemon(e) => e.suggestion(),
            CoverageError::Exec(_) => {
                "The file is not a valid execution-data file or was written by an incompatible agent."
                    .to_string()
            }
            CoverageError::Io(_) => "Check file permissions and free disk space.".to_string(),
        }
    }

    /// Process exit code, following sysexits.h.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoverageError::RecorderNotStarted
            | CoverageError::AgentUnavailable
            | CoverageError::AgentAlreadyInstalled => 64, // EX_USAGE
            CoverageError::Exec(_) => 65,                // EX_DATAERR
            CoverageError::Handshake { .. } => 69,       // EX_UNAVAILABLE
            CoverageError::Forward { .. } => 73,         // EX_CANTCREAT
            CoverageError::Daemon(_) | CoverageError::Io(_) => 74, // EX_IOERR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_errors_are_transparent() {
        let err = CoverageError::from(DaemonError::WriterClosed);
        assert_eq!(err.to_string(), "Coverage output is already closed");
        assert_eq!(err.suggestion(), DaemonError::WriterClosed.suggestion());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CoverageError::RecorderNotStarted.exit_code(), 64);
        assert_eq!(
            CoverageError::from(ExecError::UnknownBlock(9)).exit_code(),
            65
        );
        assert_eq!(
            CoverageError::Forward {
                path: PathBuf::from("x"),
                source: io::Error::other("denied"),
            }
            .exit_code(),
            73
        );
    }
}
