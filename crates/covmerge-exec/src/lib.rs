#![deny(clippy::all)]

//! Codec for coverage execution data.
//!
//! The same block grammar serves two purposes: the on-disk execution-data
//! file (a header followed by session-info and execution-data blocks) and the
//! remote-control protocol an agent in `tcpclient` mode speaks over a socket
//! (the file grammar plus command blocks).

mod compact;
mod error;
mod file;
mod reader;
mod types;
mod writer;

pub use error::ExecError;
pub use file::ExecFile;
pub use file::read_exec_file;
pub use reader::ExecDataReader;
pub use types::Block;
pub use types::ExecutionData;
pub use types::SessionInfo;
pub use types::BLOCK_CMDDUMP;
pub use types::BLOCK_CMDOK;
pub use types::BLOCK_EXECUTIONDATA;
pub use types::BLOCK_HEADER;
pub use types::BLOCK_SESSIONINFO;
pub use types::FORMAT_VERSION;
pub use types::MAGIC_NUMBER;
pub use writer::ExecDataWriter;

pub type Result<T> = std::result::Result<T, ExecError>;
