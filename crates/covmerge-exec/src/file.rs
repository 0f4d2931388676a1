use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::ExecError;
use crate::reader::ExecDataReader;
use crate::types::{Block, ExecutionData, SessionInfo};

/// A fully decoded execution-data file, blocks kept in file order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecFile {
    pub headers: usize,
    pub sessions: Vec<SessionInfo>,
    pub records: Vec<ExecutionData>,
}

impl ExecFile {
    pub fn from_reader<R: Read>(input: R) -> Result<Self, ExecError> {
        let mut file = ExecFile::default();
        for block in ExecDataReader::new(input) {
            match block? {
                Block::Header { .. } => file.headers += 1,
                Block::SessionInfo(info) => file.sessions.push(info),
                Block::ExecutionData(data) => file.records.push(data),
                command => return Err(ExecError::UnexpectedBlock(command.kind())),
            }
        }
        Ok(file)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name.as_str())
    }

    pub fn records_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ExecutionData> {
        self.records.iter().filter(move |r| r.name == name)
    }

    /// Collapses repeated records of the same class into one, ORing probes,
    /// the way a report generator loads a merged file. Records whose probe
    /// vectors disagree are kept separate.
    pub fn merged_records(&self) -> Vec<ExecutionData> {
        let mut merged: Vec<ExecutionData> = Vec::new();
        for record in &self.records {
            let absorbed = merged
                .iter_mut()
                .find(|m| m.id == record.id && m.name == record.name)
                .is_some_and(|m| m.merge(record).is_ok());
            if !absorbed {
                merged.push(record.clone());
            }
        }
        merged
    }
}

pub fn read_exec_file(path: &Path) -> Result<ExecFile, ExecError> {
    let file = File::open(path)?;
    ExecFile::from_reader(BufReader::new(file))
}
