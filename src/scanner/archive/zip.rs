use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{ArchiveError, ArchiveIterator};

/// ZIP/CBZ/EPUB backend over `zip::ZipArchive`.
pub struct ZipIter {
    archive: ::zip::ZipArchive<BufReader<File>>,
    next_index: usize,
    current: Option<usize>,
    name: String,
    size: u64,
    is_dir: bool,
}

impl ZipIter {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let archive = ::zip::ZipArchive::new(BufReader::new(file))?;
        Ok(Self {
            archive,
            next_index: 0,
            current: None,
            name: String::new(),
            size: 0,
            is_dir: false,
        })
    }
}

impl ArchiveIterator for ZipIter {
    fn next_entry(&mut self) -> Result<bool, ArchiveError> {
        if self.next_index >= self.archive.len() {
            self.current = None;
            return Ok(false);
        }
        let index = self.next_index;
        self.next_index += 1;

        let entry = self.archive.by_index_raw(index)?;
        self.name = entry.name().to_string();
        self.size = entry.size();
        self.is_dir = entry.is_dir();
        self.current = Some(index);
        Ok(true)
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
        let index = self.current.ok_or(ArchiveError::NoEntry)?;
        Ok(Box::new(self.archive.by_index(index)?))
    }

    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry = match self.archive.by_name(name) {
            Ok(entry) => entry,
            Err(::zip::result::ZipError::FileNotFound) => {
                return Err(ArchiveError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        Ok(data)
    }
}
