use crate::compact::{put_bool_array, put_utf};
use crate::error::ExecError;

pub const BLOCK_HEADER: u8 = 0x01;
pub const BLOCK_SESSIONINFO: u8 = 0x10;
pub const BLOCK_EXECUTIONDATA: u8 = 0x11;
pub const BLOCK_CMDOK: u8 = 0x20;
pub const BLOCK_CMDDUMP: u8 = 0x40;

pub const MAGIC_NUMBER: u16 = 0xC0C0;
pub const FORMAT_VERSION: u16 = 0x1007;

/// Identifies one agent dump: who sent it and when (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub start: i64,
    pub dump: i64,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, start: i64, dump: i64) -> Self {
        Self {
            id: id.into(),
            start,
            dump,
        }
    }
}

/// Probe hits recorded for one class.
///
/// `id` is the class id computed by the instrumenter and `name` the VM class
/// name (`com/example/Foo`). The probe vector is opaque to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionData {
    pub id: u64,
    pub name: String,
    pub probes: Vec<bool>,
}

impl ExecutionData {
    pub fn new(id: u64, name: impl Into<String>, probes: Vec<bool>) -> Self {
        Self {
            id,
            name: name.into(),
            probes,
        }
    }

    pub fn has_hits(&self) -> bool {
        self.probes.iter().any(|hit| *hit)
    }

    pub fn hit_count(&self) -> usize {
        self.probes.iter().filter(|hit| **hit).count()
    }

    /// ORs `other`'s probes into this record.
    ///
    /// Returns an error when the records describe different class versions.
    pub fn merge(&mut self, other: &ExecutionData) -> Result<(), ExecError> {
        if self.id != other.id || self.probes.len() != other.probes.len() {
            return Err(ExecError::Malformed(format!(
                "incompatible execution data for class {} (id {:016x} vs {:016x})",
                self.name, self.id, other.id
            )));
        }
        for (mine, theirs) in self.probes.iter_mut().zip(&other.probes) {
            *mine |= *theirs;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Header { version: u16 },
    SessionInfo(SessionInfo),
    ExecutionData(ExecutionData),
    /// Sent by an agent once it finished answering a dump.
    CmdOk,
    CmdDump { dump: bool, reset: bool },
}

impl Block {
    pub fn header() -> Self {
        Block::Header {
            version: FORMAT_VERSION,
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Block::Header { .. } => BLOCK_HEADER,
            Block::SessionInfo(_) => BLOCK_SESSIONINFO,
            Block::ExecutionData(_) => BLOCK_EXECUTIONDATA,
            Block::CmdOk => BLOCK_CMDOK,
            Block::CmdDump { .. } => BLOCK_CMDDUMP,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Block::CmdOk | Block::CmdDump { .. })
    }

    /// Encodes the whole block, type byte included, so it can be written in
    /// a single call.
    pub fn encode(&self) -> Result<Vec<u8>, ExecError> {
        let mut out = vec![self.kind()];
        match self {
            Block::Header { version } => {
                out.extend_from_slice(&MAGIC_NUMBER.to_be_bytes());
                out.extend_from_slice(&version.to_be_bytes());
            }
            Block::SessionInfo(info) => {
                put_utf(&mut out, &info.id)?;
                out.extend_from_slice(&info.start.to_be_bytes());
                out.extend_from_slice(&info.dump.to_be_bytes());
            }
            Block::ExecutionData(data) => {
                out.extend_from_slice(&data.id.to_be_bytes());
                put_utf(&mut out, &data.name)?;
                put_bool_array(&mut out, &data.probes)?;
            }
            Block::CmdOk => {}
            Block::CmdDump { dump, reset } => {
                out.push(u8::from(*dump));
                out.push(u8::from(*reset));
            }
        }
        Ok(out)
    }
}

impl From<SessionInfo> for Block {
    fn from(info: SessionInfo) -> Self {
        Block::SessionInfo(info)
    }
}

impl From<ExecutionData> for Block {
    fn from(data: ExecutionData) -> Self {
        Block::ExecutionData(data)
    }
}
