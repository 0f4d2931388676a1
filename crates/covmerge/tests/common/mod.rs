#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use covmerge_exec::{ExecDataWriter, ExecutionData, SessionInfo};

pub fn covmerge_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("covmerge"));
    for var in [
        "COVMERGE_OUTPUT",
        "COVMERGE_INCLUDES",
        "COVMERGE_EXCLUDES",
        "COVMERGE_JAVAAGENT",
        "COVMERGE_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("NO_COLOR", "1");
    cmd
}

pub fn covmerge_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("covmerge").to_path_buf()
}

/// Writes an execution-data file the way an agent in file mode would.
pub fn write_exec_fixture(path: &Path, sessions: &[&str], records: &[ExecutionData]) {
    let file = File::create(path).unwrap();
    let mut writer = ExecDataWriter::with_header(file).unwrap();
    for (i, id) in sessions.iter().enumerate() {
        let start = 1_700_000_000_000 + i as i64 * 1_000;
        writer
            .write_session_info(&SessionInfo::new(*id, start, start + 500))
            .unwrap();
    }
    for record in records {
        writer.write_execution_data(record).unwrap();
    }
    writer.flush().unwrap();
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}
