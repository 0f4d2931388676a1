#![deny(clippy::all)]

//! Coverage collection for build-tool integration tests that run in isolated
//! sandboxes.
//!
//! A [`CoverageRecorder`] owns a loopback listener that sandboxed agents
//! connect to; [`AgentOptions`] turns its port into the settings a sandbox
//! needs, and everything the agents report ends up in one execution-data
//! file.

pub mod agent;
pub mod commands;
mod error;
pub mod forward;
pub mod handlers;
pub mod recorder;
pub mod settings;
pub mod telemetry;

pub use agent::CoverageAgent;
pub use agent::TcpClientAgent;
pub use error::CoverageError;
pub use forward::AgentOptions;
pub use recorder::CoverageRecorder;
pub use recorder::RecorderSlot;
pub use settings::Filters;
pub use settings::SessionSettings;

pub type Result<T> = std::result::Result<T, CoverageError>;
