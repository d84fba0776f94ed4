//! Uniform forward iteration over container entries.
//!
//! Entries come back in the container's native order. Page lists are sorted
//! with [`natural_cmp`] before they are stored or served.

mod rar;
mod sevenz;
mod zip;

use std::cmp::Ordering;
use std::io::Read;
use std::path::Path;

use super::content_type::MediaType;

pub use self::rar::RarIter;
pub use self::sevenz::SevenZIter;
pub use self::zip::ZipIter;

/// Single-pass cursor over the entries of one container.
///
/// Not shared across threads; open one per task.
pub trait ArchiveIterator {
    /// Advance to the next entry. `Ok(false)` once the container is exhausted.
    fn next_entry(&mut self) -> Result<bool, ArchiveError>;

    fn entry_name(&self) -> &str;

    fn entry_size(&self) -> u64;

    fn entry_is_dir(&self) -> bool;

    /// Stream of the current entry's content.
    fn entry_reader(&mut self) -> Result<Box<dyn Read + '_>, ArchiveError>;

    /// Random access by entry name. May re-open or re-scan the container.
    fn read_by_name(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError>;

    fn read_entry(&mut self) -> Result<Vec<u8>, ArchiveError> {
        let mut data = Vec::with_capacity(self.entry_size() as usize);
        self.entry_reader()?.read_to_end(&mut data)?;
        Ok(data)
    }
}

/// Open the backend matching `media_type`.
pub fn open(path: &Path, media_type: MediaType) -> Result<Box<dyn ArchiveIterator>, ArchiveError> {
    match media_type {
        MediaType::Zip | MediaType::Epub => Ok(Box::new(ZipIter::open(path)?)),
        MediaType::Rar => Ok(Box::new(RarIter::open(path)?)),
        MediaType::SevenZip => Ok(Box::new(SevenZIter::open(path)?)),
        other => Err(ArchiveError::Unsupported(format!("{other:?}"))),
    }
}

/// Read one named entry from a container in a single call.
pub fn read_entry(path: &Path, media_type: MediaType, name: &str) -> Result<Vec<u8>, ArchiveError> {
    open(path, media_type)?.read_by_name(name)
}

/// Case-insensitive ordering that compares digit runs by value, so
/// `p2.jpg` sorts before `p10.jpg`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let mut ai = a_lower.chars().peekable();
    let mut bi = b_lower.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        out.push(c);
        it.next();
    }
    out
}

/// Sort entry names in place with [`natural_cmp`].
pub fn sort_natural(names: &mut [String]) {
    names.sort_by(|a, b| natural_cmp(a, b));
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] ::zip::result::ZipError),
    #[error("RAR error: {0}")]
    Rar(String),
    #[error("7z error: {0}")]
    SevenZ(String),
    #[error("no current entry")]
    NoEntry,
    #[error("entry not found: {0}")]
    NotFound(String),
    #[error("unsupported container: {0}")]
    Unsupported(String),
}
