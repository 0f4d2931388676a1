use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid execution data: expected header block, found 0x{found:02x}")]
    MissingHeader { found: u8 },

    #[error("Invalid execution data: bad magic number 0x{found:04x}")]
    InvalidMagic { found: u16 },

    #[error("Incompatible execution data version 0x{found:04x} (expected 0x{expected:04x})")]
    IncompatibleVersion { found: u16, expected: u16 },

    #[error("Unknown block type 0x{0:02x}")]
    UnknownBlock(u8),

    #[error("Block type 0x{0:02x} is not allowed here")]
    UnexpectedBlock(u8),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("String too long for modified UTF-8 encoding: {0} bytes")]
    StringTooLong(usize),
}

impl ExecError {
    /// True when the stream ended in the middle of a block.
    pub fn is_truncated(&self) -> bool {
        matches!(self, ExecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
