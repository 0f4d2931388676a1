use std::io::Write;

use crate::error::ExecError;
use crate::types::{Block, ExecutionData, SessionInfo};

/// Writes blocks to a file or to the remote-control side of a socket.
///
/// Every block is encoded in full before it reaches the underlying writer.
pub struct ExecDataWriter<W> {
    out: W,
}

impl<W: Write> ExecDataWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Creates a writer and immediately emits the header block, which is how
    /// both a new file and a new protocol peer must start.
    pub fn with_header(out: W) -> Result<Self, ExecError> {
        let mut writer = Self::new(out);
        writer.write_header()?;
        Ok(writer)
    }

    pub fn write_block(&mut self, block: &Block) -> Result<(), ExecError> {
        let bytes = block.encode()?;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    pub fn write_header(&mut self) -> Result<(), ExecError> {
        self.write_block(&Block::header())
    }

    pub fn write_session_info(&mut self, info: &SessionInfo) -> Result<(), ExecError> {
        self.write_block(&Block::SessionInfo(info.clone()))
    }

    pub fn write_execution_data(&mut self, data: &ExecutionData) -> Result<(), ExecError> {
        self.write_block(&Block::ExecutionData(data.clone()))
    }

    pub fn send_cmd_ok(&mut self) -> Result<(), ExecError> {
        self.write_block(&Block::CmdOk)
    }

    pub fn send_dump_command(&mut self, dump: bool, reset: bool) -> Result<(), ExecError> {
        self.write_block(&Block::CmdDump { dump, reset })
    }

    pub fn flush(&mut self) -> Result<(), ExecError> {
        self.out.flush()?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ExecDataReader;
    use std::io::Cursor;

    #[test]
    fn test_with_header_starts_stream() {
        let writer = ExecDataWriter::with_header(Vec::new()).unwrap();
        assert_eq!(writer.into_inner(), vec![0x01, 0xC0, 0xC0, 0x10, 0x07]);
    }

    #[test]
    fn test_agent_dump_sequence_is_readable() {
        let mut writer = ExecDataWriter::with_header(Vec::new()).unwrap();
        writer
            .write_session_info(&SessionInfo::new("s", 1, 2))
            .unwrap();
        writer
            .write_execution_data(&ExecutionData::new(9, "pkg/A", vec![true]))
            .unwrap();
        writer.send_cmd_ok().unwrap();

        let blocks: Vec<Block> = ExecDataReader::new(Cursor::new(writer.into_inner()))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3], Block::CmdOk);
    }

    #[test]
    fn test_oversized_name_writes_nothing() {
        let mut writer = ExecDataWriter::new(Vec::new());
        let data = ExecutionData::new(1, "n".repeat(70_000), vec![true]);
        assert!(matches!(
            writer.write_execution_data(&data),
            Err(ExecError::StringTooLong(_))
        ));
        assert!(writer.into_inner().is_empty());
    }
}
