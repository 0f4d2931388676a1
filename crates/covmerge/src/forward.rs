//! Connection parameters handed to a sandboxed build so its agent reports to
//! the recorder instead of writing its own file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::CoverageError;
use crate::settings::{Filters, SessionSettings};

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const GRADLE_PROPERTIES: &str = "gradle.properties";
const SYSTEM_PROP_PREFIX: &str = "systemProp.jacoco-agent.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentOptions {
    pub address: String,
    pub port: u16,
    pub session_id: String,
    pub filters: Option<Filters>,
}

impl AgentOptions {
    /// Options for `port` with a fresh session id and no filters.
    pub fn new(port: u16) -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port,
            session_id: Uuid::new_v4().to_string(),
            filters: None,
        }
    }

    pub fn for_settings(port: u16, settings: &SessionSettings) -> Self {
        Self::new(port).with_filters(settings.filters().cloned())
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_filters(mut self, filters: Option<Filters>) -> Self {
        self.filters = filters;
        self
    }

    /// Agent option pairs in the order the agent documents them.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![
            ("output", "tcpclient".to_string()),
            ("address", self.address.clone()),
            ("port", self.port.to_string()),
            ("sessionid", self.session_id.clone()),
        ];
        if let Some(filters) = &self.filters {
            entries.push(("includes", filters.includes.clone()));
            entries.push(("excludes", filters.excludes.clone()));
        }
        entries
    }

    /// `output=tcpclient,address=127.0.0.1,port=...` as accepted after
    /// `-javaagent:<jar>=`.
    pub fn to_agent_args(&self) -> String {
        self.entries()
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn javaagent_arg(&self, jar: &Path) -> String {
        format!("-javaagent:{}={}", jar.display(), self.to_agent_args())
    }

    /// Lines for a sandbox's `gradle.properties`, leading newline included so
    /// they never join an unterminated last line of an existing file.
    pub fn gradle_properties(&self) -> String {
        let mut out = String::from("\n");
        for (key, value) in self.entries() {
            out.push_str(SYSTEM_PROP_PREFIX);
            out.push_str(key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }

    /// Appends the connection properties to `<project_dir>/gradle.properties`,
    /// creating the file when missing.
    pub fn append_to_project(&self, project_dir: &Path) -> Result<PathBuf, CoverageError> {
        let path = project_dir.join(GRADLE_PROPERTIES);
        let forward_err = |source| CoverageError::Forward {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(forward_err)?;
        file.write_all(self.gradle_properties().as_bytes())
            .map_err(forward_err)?;

        debug!(path = %path.display(), port = self.port, session = %self.session_id, "Forwarded coverage settings");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn options() -> AgentOptions {
        AgentOptions::new(41234).with_session_id("test")
    }

    #[test]
    fn test_new_generates_session_id() {
        let a = AgentOptions::new(1);
        let b = AgentOptions::new(1);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.address, DEFAULT_ADDRESS);
    }

    #[test]
    fn test_agent_args_without_filters() {
        assert_eq!(
            options().to_agent_args(),
            "output=tcpclient,address=127.0.0.1,port=41234,sessionid=test"
        );
    }

    #[test]
    fn test_agent_args_with_filters() {
        let opts = options().with_filters(Some(Filters::new("com.acme.*", "com.acme.gen.*")));
        assert_eq!(
            opts.to_agent_args(),
            "output=tcpclient,address=127.0.0.1,port=41234,sessionid=test,includes=com.acme.*,excludes=com.acme.gen.*"
        );
    }

    #[test]
    fn test_javaagent_arg() {
        let arg = options().javaagent_arg(Path::new("/opt/jacocoagent.jar"));
        assert!(arg.starts_with("-javaagent:/opt/jacocoagent.jar=output=tcpclient,"));
    }

    #[test]
    fn test_gradle_properties() {
        let opts = options().with_filters(Some(Filters::new("*", "")));
        assert_eq!(
            opts.gradle_properties(),
            "\nsystemProp.jacoco-agent.output=tcpclient\n\
             systemProp.jacoco-agent.address=127.0.0.1\n\
             systemProp.jacoco-agent.port=41234\n\
             systemProp.jacoco-agent.sessionid=test\n\
             systemProp.jacoco-agent.includes=*\n\
             systemProp.jacoco-agent.excludes=\n"
        );
    }

    #[test]
    fn test_append_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = options().append_to_project(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(GRADLE_PROPERTIES));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("systemProp.jacoco-agent.port=41234\n"));
    }

    #[test]
    fn test_append_keeps_existing_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GRADLE_PROPERTIES);
        fs::write(&path, "org.gradle.caching=true").unwrap();

        options().append_to_project(dir.path()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("org.gradle.caching=true\nsystemProp.jacoco-agent.output=tcpclient\n"));
    }

    #[test]
    fn test_append_to_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = options().append_to_project(&dir.path().join("missing"));
        assert!(matches!(result, Err(CoverageError::Forward { .. })));
    }

    #[test]
    fn test_for_settings_copies_filters() {
        let settings =
            SessionSettings::new("out.exec").with_filters(Some(Filters::new("a.*", "b.*")));
        let opts = AgentOptions::for_settings(9, &settings);
        assert_eq!(opts.filters, Some(Filters::new("a.*", "b.*")));
        assert_eq!(opts.port, 9);
    }
}
