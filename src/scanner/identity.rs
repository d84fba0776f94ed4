use std::collections::HashMap;
use std::path::Path;

use md5::{Digest, Md5};
use tracing::debug;

pub const ITEM_TAG: &str = "item";
pub const SERIES_TAG: &str = "series";

pub const ITEM_ATTR: &str = "user.item_hash";
pub const SERIES_ATTR: &str = "user.series_hash";

/// Hex md5 of `tag + input`.
pub fn hash(tag: &str, input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(tag.as_bytes());
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic id derived from the current absolute path. Changes when the
/// file moves.
pub fn path_hash(tag: &str, path: &Path) -> String {
    let normalized: String = path.to_string_lossy().chars().filter(|c| *c != '#').collect();
    hash(tag, &normalized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("extended attributes are not supported here")]
pub struct Unsupported;

/// Id stored in an extended attribute of `path`, generated once from a
/// random UUID and read back on every later call.
pub fn cached_hash(tag: &str, attr: &str, path: &Path) -> Result<String, Unsupported> {
    match xattr::get(path, attr) {
        Ok(Some(value)) => {
            if let Ok(s) = String::from_utf8(value) {
                let s = s.trim();
                if is_hex_id(s) {
                    return Ok(s.to_string());
                }
            }
        }
        Ok(None) => {}
        Err(e) => {
            debug!("xattr read failed on {}: {e}", path.display());
            return Err(Unsupported);
        }
    }

    let id = hash(tag, &uuid::Uuid::new_v4().to_string());
    xattr::set(path, attr, id.as_bytes()).map_err(|e| {
        debug!("xattr write failed on {}: {e}", path.display());
        Unsupported
    })?;
    Ok(id)
}

/// Cached item id, or the path hash when attributes are unavailable.
pub fn item_hash(path: &Path) -> String {
    cached_hash(ITEM_TAG, ITEM_ATTR, path).unwrap_or_else(|_| path_hash(ITEM_TAG, path))
}

/// Cached id for a file not yet in the catalog. A copy that carried its
/// source's attribute along gets a new one, so source and copy stay apart.
pub fn new_item_hash(path: &Path, known: &KnownArchives) -> String {
    let folder = path.to_string_lossy();
    let id = item_hash(path);
    match known.folder_of(&id) {
        Some(other) if other != folder.as_ref() && Path::new(other).exists() => {
            debug!("{} carries the id of {other}, issuing a new one", path.display());
            reissue_hash(ITEM_TAG, ITEM_ATTR, path).unwrap_or_else(|_| path_hash(ITEM_TAG, path))
        }
        _ => id,
    }
}

/// Drop the stored attribute and generate a fresh one.
fn reissue_hash(tag: &str, attr: &str, path: &Path) -> Result<String, Unsupported> {
    xattr::remove(path, attr).map_err(|e| {
        debug!("xattr remove failed on {}: {e}", path.display());
        Unsupported
    })?;
    cached_hash(tag, attr, path)
}

/// Series id of a folder-grouped series.
pub fn folder_series_hash(dir: &Path) -> String {
    cached_hash(SERIES_TAG, SERIES_ATTR, dir).unwrap_or_else(|_| path_hash(SERIES_TAG, dir))
}

/// Series id wrapping a single item.
pub fn single_series_hash(item_id: &str) -> String {
    hash(SERIES_TAG, item_id)
}

/// Fallback chapter id when the chapter carries no explicit identifier.
pub fn chapter_id(archive_id: &str, title: &str) -> String {
    hash(archive_id, title)
}

fn is_hex_id(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Catalogued archive ids and their file paths, consulted by the
/// duplicate guard and kept current while a batch runs.
#[derive(Debug, Clone, Default)]
pub struct KnownArchives {
    by_id: HashMap<String, String>,
}

impl KnownArchives {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            by_id: pairs.into_iter().collect(),
        }
    }

    pub fn folder_of(&self, content_id: &str) -> Option<&str> {
        self.by_id.get(content_id).map(String::as_str)
    }

    pub fn insert(&mut self, content_id: String, folder: String) {
        self.by_id.insert(content_id, folder);
    }
}

/// Outcome of identity resolution for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Assigned { content_id: String, unique: bool },
    Duplicate { content_id: String, existing_folder: String },
}

/// Inputs gathered for one file before resolution.
#[derive(Debug, Clone, Copy)]
pub struct IdentityInput<'a> {
    /// File path as stored in the catalog.
    pub folder: &'a str,
    /// Cached hash, or path hash when attributes are unsupported.
    pub candidate: &'a str,
    /// Path hash of the file, even when a cached hash exists.
    pub old_hash: &'a str,
    /// Identifier declared by the file's metadata.
    pub explicit: Option<&'a str>,
    /// Id of the archive already catalogued at this path.
    pub existing: Option<&'a str>,
    pub reimport: bool,
}

/// Apply id precedence and the duplicate guard.
///
/// An archive already catalogued at the same path keeps its id. Otherwise an
/// explicit id beats the cached/path candidate. When the chosen id differs
/// from the candidate and either it or the old path hash is already taken by
/// another file, the file is a duplicate unless re-import was requested.
pub fn resolve(input: IdentityInput<'_>, known: &KnownArchives) -> Identity {
    let explicit = input
        .explicit
        .map(str::trim)
        .filter(|id| !id.is_empty());

    if let Some(existing) = input.existing {
        return Identity::Assigned {
            content_id: existing.to_string(),
            unique: explicit == Some(existing),
        };
    }

    let resolved = explicit.unwrap_or(input.candidate);
    if !input.reimport && resolved != input.candidate {
        for id in [resolved, input.old_hash] {
            if let Some(folder) = known.folder_of(id) {
                if folder != input.folder {
                    return Identity::Duplicate {
                        content_id: id.to_string(),
                        existing_folder: folder.to_string(),
                    };
                }
            }
        }
    }

    Identity::Assigned {
        content_id: resolved.to_string(),
        unique: explicit.is_some(),
    }
}
