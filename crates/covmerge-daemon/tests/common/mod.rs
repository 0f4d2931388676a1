#![allow(dead_code)]

use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use covmerge_daemon::AggregatorConfig;
use covmerge_exec::{
    read_exec_file, Block, ExecDataReader, ExecDataWriter, ExecFile, ExecutionData, SessionInfo,
};

/// Minimal stand-in for an agent in `tcpclient` mode.
pub struct FakeAgent {
    stream: TcpStream,
    writer: ExecDataWriter<TcpStream>,
    reader: ExecDataReader<TcpStream>,
}

impl FakeAgent {
    pub fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to listener");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let writer = ExecDataWriter::with_header(stream.try_clone().unwrap()).unwrap();
        let reader = ExecDataReader::new(stream.try_clone().unwrap());
        Self {
            stream,
            writer,
            reader,
        }
    }

    pub fn expect_handshake(&mut self) {
        let block = self.reader.next_block().expect("read handshake");
        assert!(
            matches!(block, Some(Block::Header { .. })),
            "expected header, got {:?}",
            block
        );
    }

    pub fn next_block(&mut self) -> Option<Block> {
        self.reader.next_block().expect("read block")
    }

    pub fn send_session_info(&mut self, id: &str) {
        self.writer
            .write_session_info(&SessionInfo::new(id, 1_000, 2_000))
            .unwrap();
    }

    pub fn send_record(&mut self, name: &str, probes: Vec<bool>) {
        self.writer
            .write_execution_data(&ExecutionData::new(class_id(name), name, probes))
            .unwrap();
    }

    pub fn send_cmd_ok(&mut self) {
        self.writer.send_cmd_ok().unwrap();
    }

    pub fn send_dump_command(&mut self) {
        self.writer.send_dump_command(true, false).unwrap();
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        use std::io::Write;
        self.writer.get_mut().write_all(bytes).unwrap();
    }

    /// One complete dump: session info, records, `CMD_OK`.
    pub fn dump(&mut self, session_id: &str, names: &[String]) {
        self.send_session_info(session_id);
        for name in names {
            self.send_record(name, probes_for(name));
        }
        self.send_cmd_ok();
    }

    pub fn disconnect(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub fn class_id(name: &str) -> u64 {
    name.bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| (acc ^ u64::from(b)).wrapping_mul(0x100_0000_01b3))
}

/// Probe vectors whose length depends on the name, so truncation shows.
pub fn probes_for(name: &str) -> Vec<bool> {
    (0..(name.len() * 3)).map(|i| i % 3 == 0).collect()
}

pub fn test_config() -> AggregatorConfig {
    AggregatorConfig::default()
        .with_drain_timeout(Duration::from_secs(10))
        .with_accept_poll_interval(Duration::from_millis(5))
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn decode(path: &Path) -> ExecFile {
    read_exec_file(path).expect("decode merged output")
}
