use std::env;
use std::time::Duration;

const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ACCEPT_POLL_MS: u64 = 10;
const DEFAULT_WRITE_BUFFER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Collective budget for in-flight sessions to finish once `close` runs.
    pub drain_timeout: Duration,
    pub accept_poll_interval: Duration,
    pub write_buffer_bytes: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Self {
        Self {
            drain_timeout: Duration::from_secs(
                env::var("COVMERGE_DRAIN_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_DRAIN_TIMEOUT_SECS),
            ),
            accept_poll_interval: Duration::from_millis(
                env::var("COVMERGE_ACCEPT_POLL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_ACCEPT_POLL_MS),
            ),
            write_buffer_bytes: env::var("COVMERGE_WRITE_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|bytes| *bytes > 0)
                .unwrap_or(DEFAULT_WRITE_BUFFER_BYTES),
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    pub fn with_write_buffer_bytes(mut self, bytes: usize) -> Self {
        self.write_buffer_bytes = bytes;
        self
    }
}
