//! Scratch storage for downloaded catalog documents.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use tempfile::TempPath;

use crate::error::AppError;

/// A downloaded document spooled to a temporary file.
///
/// The file is removed when the value is dropped, whichever way the harvest
/// ends.
#[derive(Debug)]
pub struct ScratchDocument {
    path: TempPath,
    len: u64,
}

impl ScratchDocument {
    pub fn new(path: TempPath, len: u64) -> Self {
        Self { path, len }
    }

    /// Spools an in-memory buffer to a new scratch file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self::new(file.into_temp_path(), bytes.len() as u64))
    }

    /// Size of the document in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a buffered reader positioned at the start of the document.
    pub fn open(&self) -> Result<BufReader<File>, AppError> {
        Ok(BufReader::new(File::open(&self.path)?))
    }
}
