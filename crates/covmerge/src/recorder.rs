//! Process-wide coverage recorder.
//!
//! The build plugin starts one recorder before its first sandboxed build,
//! forwards the port into each sandbox, and closes the recorder once the
//! test run is over. Without settings the recorder stays inert: no port, no
//! file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use covmerge_common::mutex_lock_or_recover;
use covmerge_daemon::{AggregatorConfig, CloseReport, CoverageListener, MetricsSnapshot};
use tracing::{debug, info, warn};

use crate::error::CoverageError;
use crate::forward::AgentOptions;
use crate::settings::SessionSettings;

pub struct CoverageRecorder {
    listener: CoverageListener,
    settings: SessionSettings,
}

impl CoverageRecorder {
    pub fn start(settings: SessionSettings, config: AggregatorConfig) -> Result<Self, CoverageError> {
        let listener = CoverageListener::start(settings.output(), config)?;
        Ok(Self { listener, settings })
    }

    /// Starts with the process settings, or returns `None` when coverage is
    /// not configured.
    pub fn start_configured() -> Result<Option<Self>, CoverageError> {
        match SessionSettings::get() {
            Some(settings) => {
                Self::start(settings.clone(), AggregatorConfig::from_env()).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn output_path(&self) -> &Path {
        self.listener.output_path()
    }

    /// Connection settings for one sandbox, each with its own session id.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions::for_settings(self.port(), &self.settings)
    }

    pub fn forward_to_project(&self, project_dir: &Path) -> Result<PathBuf, CoverageError> {
        self.agent_options().append_to_project(project_dir)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.listener.metrics()
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_closed()
    }

    pub fn close(&self) -> CloseReport {
        self.listener.close()
    }
}

enum SlotState {
    Unstarted,
    Inert,
    Running(CoverageRecorder),
    Closed,
}

/// Lifecycle holder for the recorder of a build.
///
/// Starting twice keeps the first recorder; asking for the port before
/// starting or after closing is an error, while an inert slot simply has no
/// port.
pub struct RecorderSlot {
    state: Mutex<SlotState>,
}

impl RecorderSlot {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Unstarted),
        }
    }

    /// Starts the recorder for `settings`. With no settings the slot
    /// becomes inert and `Ok(None)` is returned.
    pub fn start_with(
        &self,
        settings: Option<&SessionSettings>,
        config: AggregatorConfig,
    ) -> Result<Option<u16>, CoverageError> {
        let mut state = mutex_lock_or_recover(&self.state);
        match &*state {
            SlotState::Running(recorder) => {
                debug!(port = recorder.port(), "Coverage recorder already running");
                return Ok(Some(recorder.port()));
            }
            SlotState::Inert => return Ok(None),
            SlotState::Unstarted | SlotState::Closed => {}
        }

        let Some(settings) = settings else {
            debug!("Coverage not configured, recorder stays inert");
            *state = SlotState::Inert;
            return Ok(None);
        };

        let recorder = CoverageRecorder::start(settings.clone(), config)?;
        let port = recorder.port();
        *state = SlotState::Running(recorder);
        Ok(Some(port))
    }

    /// Starts from the process settings and the environment config.
    pub fn start(&self) -> Result<Option<u16>, CoverageError> {
        self.start_with(SessionSettings::get(), AggregatorConfig::from_env())
    }

    pub fn port(&self) -> Result<Option<u16>, CoverageError> {
        match &*mutex_lock_or_recover(&self.state) {
            SlotState::Running(recorder) => Ok(Some(recorder.port())),
            SlotState::Inert => Ok(None),
            SlotState::Unstarted | SlotState::Closed => Err(CoverageError::RecorderNotStarted),
        }
    }

    /// Appends the agent settings to a sandbox project. Does nothing when
    /// the slot is inert.
    pub fn forward_to_project(&self, project_dir: &Path) -> Result<Option<PathBuf>, CoverageError> {
        match &*mutex_lock_or_recover(&self.state) {
            SlotState::Running(recorder) => recorder.forward_to_project(project_dir).map(Some),
            SlotState::Inert => Ok(None),
            SlotState::Unstarted | SlotState::Closed => Err(CoverageError::RecorderNotStarted),
        }
    }

    /// Closes a running recorder. Returns `None` when there was nothing to
    /// close.
    pub fn close(&self) -> Option<CloseReport> {
        let previous = {
            let mut state = mutex_lock_or_recover(&self.state);
            match &*state {
                SlotState::Running(_) => std::mem::replace(&mut *state, SlotState::Closed),
                _ => return None,
            }
        };

        let SlotState::Running(recorder) = previous else {
            return None;
        };
        let report = recorder.close();
        if report.abandoned > 0 {
            warn!(
                abandoned = report.abandoned,
                output = %recorder.output_path().display(),
                "Coverage recorder closed with abandoned sessions"
            );
        } else {
            info!(drained = report.drained, "Coverage recorder closed");
        }
        Some(report)
    }
}

impl Default for RecorderSlot {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: RecorderSlot = RecorderSlot::new();

/// The recorder slot shared by everything in this process.
pub fn global() -> &'static RecorderSlot {
    &GLOBAL
}
