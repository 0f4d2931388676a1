#![deny(clippy::all)]

mod config;
mod error;
mod listener;
mod metrics;
mod session;
mod shutdown;
#[cfg(unix)]
mod signal_handler;
mod writer;

pub use config::AggregatorConfig;
pub use error::DaemonError;
pub use listener::CoverageListener;
pub use metrics::AggregatorMetrics;
pub use metrics::MetricsSnapshot;
pub use shutdown::CloseReport;
#[cfg(unix)]
pub use signal_handler::{SignalHandler, StopSignal};
pub use writer::SharedWriter;

pub type Result<T> = std::result::Result<T, DaemonError>;
