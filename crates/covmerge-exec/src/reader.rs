use std::io::Read;

use crate::compact::{read_block_type, read_bool, read_bool_array, read_i64, read_u16, read_utf};
use crate::error::ExecError;
use crate::types::{
    Block, ExecutionData, SessionInfo, BLOCK_CMDDUMP, BLOCK_CMDOK, BLOCK_EXECUTIONDATA,
    BLOCK_HEADER, BLOCK_SESSIONINFO, FORMAT_VERSION, MAGIC_NUMBER,
};

/// Pulls blocks one at a time from a file or a remote-control socket.
///
/// The first block of a stream must be a header. After an error the reader
/// is fused: iteration yields `None` from then on.
pub struct ExecDataReader<R> {
    input: R,
    first_block: bool,
    failed: bool,
}

impl<R: Read> ExecDataReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            first_block: true,
            failed: false,
        }
    }

    /// Returns the next block, or `Ok(None)` on a clean end of stream.
    pub fn next_block(&mut self) -> Result<Option<Block>, ExecError> {
        if self.failed {
            return Ok(None);
        }
        let result = self.read_block();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn read_block(&mut self) -> Result<Option<Block>, ExecError> {
        let Some(kind) = read_block_type(&mut self.input)? else {
            return Ok(None);
        };

        if self.first_block && kind != BLOCK_HEADER {
            return Err(ExecError::MissingHeader { found: kind });
        }
        self.first_block = false;

        let block = match kind {
            BLOCK_HEADER => self.read_header()?,
            BLOCK_SESSIONINFO => Block::SessionInfo(SessionInfo {
                id: read_utf(&mut self.input)?,
                start: read_i64(&mut self.input)?,
                dump: read_i64(&mut self.input)?,
            }),
            BLOCK_EXECUTIONDATA => Block::ExecutionData(ExecutionData {
                id: read_i64(&mut self.input)? as u64,
                name: read_utf(&mut self.input)?,
                probes: read_bool_array(&mut self.input)?,
            }),
            BLOCK_CMDOK => Block::CmdOk,
            BLOCK_CMDDUMP => Block::CmdDump {
                dump: read_bool(&mut self.input)?,
                reset: read_bool(&mut self.input)?,
            },
            other => return Err(ExecError::UnknownBlock(other)),
        };
        Ok(Some(block))
    }

    fn read_header(&mut self) -> Result<Block, ExecError> {
        let magic = read_u16(&mut self.input)?;
        if magic != MAGIC_NUMBER {
            return Err(ExecError::InvalidMagic { found: magic });
        }
        let version = read_u16(&mut self.input)?;
        if version != FORMAT_VERSION {
            return Err(ExecError::IncompatibleVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(Block::Header { version })
    }

    pub fn get_ref(&self) -> &R {
        &self.input
    }

    pub fn into_inner(self) -> R {
        self.input
    }
}

impl<R: Read> Iterator for ExecDataReader<R> {
    type Item = Result<Block, ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}
