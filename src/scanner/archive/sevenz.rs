use std::io::Read;
use std::path::{Path, PathBuf};

use sevenz_rust::{Password, SevenZReader};

use super::{ArchiveError, ArchiveIterator};

struct EntryInfo {
    name: String,
    size: u64,
    is_dir: bool,
}

/// 7z/CB7 backend. Headers are listed up front; content is decoded on demand
/// by walking the solid stream to the requested entry.
pub struct SevenZIter {
    path: PathBuf,
    entries: Vec<EntryInfo>,
    next_index: usize,
    current: Option<usize>,
    buffer: Option<Vec<u8>>,
}

impl SevenZIter {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let reader = SevenZReader::open(path, Password::empty())
            .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;
        let entries = reader
            .archive()
            .files
            .iter()
            .map(|e| EntryInfo {
                name: e.name().replace('\\', "/"),
                size: e.size(),
                is_dir: e.is_directory(),
            })
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            next_index: 0,
            current: None,
            buffer: None,
        })
    }

    fn extract(&self, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let mut reader = SevenZReader::open(&self.path, Password::empty())
            .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;
        let mut found = None;
        reader
            .for_each_entries(|entry, stream| {
                if entry.name().replace('\\', "/") != name {
                    std::io::copy(stream, &mut std::io::sink())?;
                    return Ok(true);
                }
                let mut data = Vec::with_capacity(entry.size() as usize);
                stream.read_to_end(&mut data)?;
                found = Some(data);
                Ok(false)
            })
            .map_err(|e| ArchiveError::SevenZ(e.to_string()))?;
        Ok(found)
    }
}

impl ArchiveIterator for SevenZIter {
    fn next_entry(&mut self) -> Result<bool, ArchiveError> {
        self.buffer = None;
        if self.next_index >= self.entries.len() {
            self.current = None;
            return Ok(false);
        }
        self.current = Some(self.next_index);
        self.next_index += 1;
        Ok(true)
    }

    fn entry_name(&self) -> &str {
        self.current
            .map(|i| self.entries[i].name.as_str())
            .unwrap_or_default()
    }

    fn entry_size(&self) -> u64 {
        self.current.map(|i| self.entries[i].size).unwrap_or(0)
    }

    fn entry_is_dir(&self) -> bool {
        self.current.is_some_and(|i| self.entries[i].is_dir)
    }

    fn entry_reader(&mut self) -> Result<Box<dyn Read + '_>, ArchiveError> {
        let index = self.current.ok_or(ArchiveError::NoEntry)?;
        if self.buffer.is_none() {
            let name = self.entries[index].name.clone();
            let data = self
                .extract(&name)?
                .ok_or_else(|| ArchiveError::NotFound(name.clone()))?;
            self.buffer = Some(data);
        }
        Ok(Box::new(self.buffer.as_deref().unwrap_or_default()))
    }

    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        self.extract(name)?
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))
    }
}
