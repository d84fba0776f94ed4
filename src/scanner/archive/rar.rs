use std::io::Read;
use std::path::{Path, PathBuf};

use unrar::{CursorBeforeFile, CursorBeforeHeader, OpenArchive, Process};

use super::{ArchiveError, ArchiveIterator};

/// RAR/CBR backend. The unrar cursor only moves forward, so content is
/// read at most once per entry and kept until the next advance.
pub struct RarIter {
    path: PathBuf,
    header: Option<OpenArchive<Process, CursorBeforeHeader>>,
    file: Option<OpenArchive<Process, CursorBeforeFile>>,
    name: String,
    size: u64,
    is_dir: bool,
    buffer: Option<Vec<u8>>,
}

impl RarIter {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let header = open_for_processing(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            header: Some(header),
            file: None,
            name: String::new(),
            size: 0,
            is_dir: false,
            buffer: None,
        })
    }
}

fn open_for_processing(path: &Path) -> Result<OpenArchive<Process, CursorBeforeHeader>, ArchiveError> {
    unrar::Archive::new(path)
        .open_for_processing()
        .map_err(|e| ArchiveError::Rar(e.to_string()))
}

fn entry_name(file: &OpenArchive<Process, CursorBeforeFile>) -> String {
    file.entry()
        .filename
        .to_string_lossy()
        .replace('\\', "/")
}

impl ArchiveIterator for RarIter {
    fn next_entry(&mut self) -> Result<bool, ArchiveError> {
        self.buffer = None;
        if let Some(file) = self.file.take() {
            let header = file.skip().map_err(|e| ArchiveError::Rar(e.to_string()))?;
            self.header = Some(header);
        }
        let Some(header) = self.header.take() else {
            return Ok(false);
        };
        match header
            .read_header()
            .map_err(|e| ArchiveError::Rar(e.to_string()))?
        {
            Some(file) => {
                let entry = file.entry();
                self.name = entry_name(&file);
                self.size = entry.unpacked_size;
                self.is_dir = entry.is_directory();
                self.file = Some(file);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn entry_name(&self) -> &str {
        &self.name
    }

    fn entry_size(&self) -> u64 {
        self.size
    }

    fn entry_is_dir(&self) -> bool {
        self.is_dir
    }

    fn entry_reader(&mut self) -> Result<Box<dyn Read + '_>, ArchiveError> {
        if self.buffer.is_none() {
            let file = self.file.take().ok_or(ArchiveError::NoEntry)?;
            let (data, header) = file.read().map_err(|e| ArchiveError::Rar(e.to_string()))?;
            self.header = Some(header);
            self.buffer = Some(data);
        }
        let data = self.buffer.as_deref().unwrap_or_default();
        Ok(Box::new(data))
    }

    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut header = Some(open_for_processing(&self.path)?);
        while let Some(current) = header.take() {
            let Some(file) = current
                .read_header()
                .map_err(|e| ArchiveError::Rar(e.to_string()))?
            else {
                break;
            };
            if entry_name(&file) == name {
                let (data, _) = file.read().map_err(|e| ArchiveError::Rar(e.to_string()))?;
                return Ok(data);
            }
            header = Some(file.skip().map_err(|e| ArchiveError::Rar(e.to_string()))?);
        }
        Err(ArchiveError::NotFound(name.to_string()))
    }
}
