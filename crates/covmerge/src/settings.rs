//! Per-process coverage settings.
//!
//! The build plugin forwards where the merged file goes (and optionally which
//! classes the agent instruments) through the environment of the test
//! process. Settings are read once and cached; no output path means coverage
//! is off and the whole subsystem stays inert.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Serialize;
use tracing::{debug, warn};

use crate::agent::{self, CoverageAgent};

pub const OUTPUT_VAR: &str = "COVMERGE_OUTPUT";
pub const INCLUDES_VAR: &str = "COVMERGE_INCLUDES";
pub const EXCLUDES_VAR: &str = "COVMERGE_EXCLUDES";
pub const JAVAAGENT_VAR: &str = "COVMERGE_JAVAAGENT";

/// Agent include/exclude patterns, forwarded verbatim and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filters {
    pub includes: String,
    pub excludes: String,
}

impl Filters {
    pub fn new(includes: impl Into<String>, excludes: impl Into<String>) -> Self {
        Self {
            includes: includes.into(),
            excludes: excludes.into(),
        }
    }

    /// Both patterns or nothing.
    pub fn from_parts(includes: Option<String>, excludes: Option<String>) -> Option<Self> {
        match (includes, excludes) {
            (Some(includes), Some(excludes)) => Some(Self::new(includes, excludes)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSettings {
    output: PathBuf,
    filters: Option<Filters>,
    javaagent: Option<PathBuf>,
}

impl SessionSettings {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            filters: None,
            javaagent: None,
        }
    }

    pub fn with_filters(mut self, filters: Option<Filters>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_javaagent(mut self, javaagent: Option<PathBuf>) -> Self {
        self.javaagent = javaagent;
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn filters(&self) -> Option<&Filters> {
        self.filters.as_ref()
    }

    pub fn javaagent(&self) -> Option<&Path> {
        self.javaagent.as_deref()
    }

    /// Resolves settings from `lookup` (an environment-like source) and the
    /// local agent, if one is installed.
    ///
    /// Filters come from the lookup when both keys are set, otherwise from
    /// the agent. A lone include or exclude key is ignored.
    pub fn resolve<F>(lookup: F, agent: Option<&dyn CoverageAgent>) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let output = lookup(OUTPUT_VAR)?;

        let includes = lookup(INCLUDES_VAR);
        let excludes = lookup(EXCLUDES_VAR);
        if includes.is_some() != excludes.is_some() {
            warn!(
                includes = includes.is_some(),
                excludes = excludes.is_some(),
                "Ignoring partial coverage filter configuration; both {} and {} are required",
                INCLUDES_VAR,
                EXCLUDES_VAR
            );
        }

        let filters = Filters::from_parts(includes, excludes)
            .or_else(|| agent.map(|a| Filters::new(a.includes(), a.excludes())));
        let javaagent = lookup(JAVAAGENT_VAR)
            .map(PathBuf::from)
            .or_else(|| agent.and_then(|a| a.location()));

        Some(Self {
            output: PathBuf::from(output),
            filters,
            javaagent,
        })
    }

    pub fn from_env() -> Option<Self> {
        let agent = agent::agent();
        Self::resolve(
            |key| env::var(key).ok().filter(|v| !v.is_empty()),
            agent.as_deref(),
        )
    }

    /// Process-wide settings, resolved on first access.
    ///
    /// A local agent must be installed before the first call for its filters
    /// to be picked up.
    pub fn get() -> Option<&'static SessionSettings> {
        static SETTINGS: OnceLock<Option<SessionSettings>> = OnceLock::new();
        SETTINGS
            .get_or_init(|| {
                let settings = Self::from_env();
                debug!(configured = settings.is_some(), "Resolved coverage settings");
                settings
            })
            .as_ref()
    }

    /// Deletes a stale output file from an earlier run. Returns whether a
    /// file was removed.
    pub fn clean_output(&self) -> io::Result<bool> {
        match fs::remove_file(&self.output) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
