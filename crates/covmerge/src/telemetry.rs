use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_VAR: &str = "COVMERGE_LOG";

/// Crates whose events follow `--verbose`; everything else stays at `warn`.
const COVMERGE_TARGETS: [&str; 4] = [
    "covmerge",
    "covmerge_daemon",
    "covmerge_exec",
    "covmerge_common",
];

/// Where diagnostics go. Command output always stays on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    pub fn resolve<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(LOG_FILE_VAR).filter(|v| !v.is_empty()) {
            Some(path) => LogTarget::File(PathBuf::from(path)),
            None => LogTarget::Stderr,
        }
    }

    pub fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }
}

/// Keeps the background log writer alive; drop it last.
#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

impl TelemetryGuard {
    fn disabled() -> Self {
        Self { _guard: None }
    }
}

/// Directive used when `RUST_LOG` is unset: `level` for the covmerge crates.
pub fn default_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(COVMERGE_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`;
/// `COVMERGE_LOG` redirects diagnostics from stderr to a file. A log file
/// that cannot be opened falls back to stderr with a warning.
pub fn init_tracing(default_level: &str) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

    let (writer, ansi, guard) = match LogTarget::from_env() {
        LogTarget::File(path) => match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                (BoxMakeWriter::new(non_blocking), false, Some(guard))
            }
            Err(err) => {
                eprintln!(
                    "Warning: cannot write covmerge log to {}: {}",
                    path.display(),
                    err
                );
                stderr_writer()
            }
        },
        LogTarget::Stderr => stderr_writer(),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(ansi)
        .with_writer(writer);

    if subscriber.try_init().is_err() {
        return TelemetryGuard::disabled();
    }

    TelemetryGuard { _guard: guard }
}

fn stderr_writer() -> (BoxMakeWriter, bool, Option<WorkerGuard>) {
    (
        BoxMakeWriter::new(std::io::stderr),
        std::io::stderr().is_terminal(),
        None,
    )
}
