use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::Serialize;

pub struct AggregatorMetrics {
    connections_accepted: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_abandoned: AtomicU64,
    session_infos_written: AtomicU64,
    records_written: AtomicU64,
    flushes: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub sessions_completed: u64,
    pub sessions_failed: u64,
    pub sessions_abandoned: u64,
    pub session_infos_written: u64,
    pub records_written: u64,
    pub flushes: u64,
    pub uptime_ms: u64,
}

impl MetricsSnapshot {
    /// Sessions that have stopped reading, for whatever reason.
    pub fn sessions_finished(&self) -> u64 {
        self.sessions_completed + self.sessions_failed
    }
}

impl Default for AggregatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorMetrics {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_abandoned: AtomicU64::new(0),
            session_infos_written: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_abandoned(&self) {
        self.sessions_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_info(&self) {
        self.session_infos_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution_data(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_abandoned: self.sessions_abandoned.load(Ordering::Relaxed),
            session_infos_written: self.session_infos_written.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
        }
    }
}
