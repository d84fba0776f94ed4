//! On-disk cover cache: `{covers_path}/{content_id}.{ext}`.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::db::DbPool;
use crate::db::models::Archive;
use crate::db::queries::archives;
use crate::scanner::archive;
use crate::scanner::builder::CoverImage;
use crate::scanner::content_type::{self, BookType};
use crate::scanner::parsers::fb2;
use crate::{djvu, pdf};

const EXTENSIONS: [&str; 4] = ["jpg", "png", "gif", "webp"];
const COVER_SCALE: u32 = 600;

fn cover_path(covers_dir: &Path, content_id: &str, ext: &str) -> PathBuf {
    covers_dir.join(format!("{content_id}.{ext}"))
}

pub fn save(covers_dir: &Path, content_id: &str, cover: &CoverImage) -> std::io::Result<()> {
    std::fs::create_dir_all(covers_dir)?;
    remove(covers_dir, content_id);
    let ext = mime_to_ext(&cover.mime);
    std::fs::write(cover_path(covers_dir, content_id, ext), &cover.data)
}

/// Cached cover for `content_id`, if one was saved.
pub fn find(covers_dir: &Path, content_id: &str) -> Option<CoverImage> {
    EXTENSIONS.iter().find_map(|ext| {
        let data = std::fs::read(cover_path(covers_dir, content_id, ext)).ok()?;
        Some(CoverImage {
            data,
            mime: ext_to_mime(ext).to_string(),
        })
    })
}

pub fn exists(covers_dir: &Path, content_id: &str) -> bool {
    EXTENSIONS
        .iter()
        .any(|ext| cover_path(covers_dir, content_id, ext).exists())
}

pub fn remove(covers_dir: &Path, content_id: &str) {
    for ext in EXTENSIONS {
        let path = cover_path(covers_dir, content_id, ext);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("Failed to remove cover {}: {e}", path.display());
            }
        }
    }
}

/// Re-extract the cover of a catalogued archive from its backing file.
pub fn extract(row: &Archive) -> Option<CoverImage> {
    let path = Path::new(&row.folder);
    match BookType::parse(&row.book_type) {
        BookType::Archive | BookType::Epub => {
            if row.cover_entry.is_empty() {
                return None;
            }
            let media_type = content_type::sniff(path);
            let data = archive::read_entry(path, media_type, &row.cover_entry)
                .inspect_err(|e| debug!("Cover entry unreadable in {}: {e}", row.folder))
                .ok()?;
            let mime = image_mime(&data);
            Some(CoverImage { data, mime })
        }
        BookType::Fb2 => {
            let data = std::fs::read(path).ok()?;
            let meta = fb2::parse(data.as_slice()).ok()?;
            let data = meta.cover_data?;
            Some(CoverImage { data, mime: meta.cover_type })
        }
        BookType::Pdf => match pdf::render_page_jpeg(path, 1, Some(COVER_SCALE)) {
            Ok(data) => Some(CoverImage { data, mime: "image/jpeg".to_string() }),
            Err(e) => {
                warn!("Failed to render PDF cover for {}: {e}", row.folder);
                None
            }
        },
        BookType::DjVu => match djvu::render_page_jpeg(path, 1, Some(COVER_SCALE)) {
            Ok(data) => Some(CoverImage { data, mime: "image/jpeg".to_string() }),
            Err(e) => {
                warn!("Failed to render DjVu cover for {}: {e}", row.folder);
                None
            }
        },
        BookType::Unknown => None,
    }
}

/// Cached cover, or a fresh extraction that is saved for next time.
pub fn load_or_extract(covers_dir: &Path, row: &Archive) -> Option<CoverImage> {
    if let Some(cover) = find(covers_dir, &row.content_id) {
        return Some(cover);
    }
    let cover = extract(row)?;
    if let Err(e) = save(covers_dir, &row.content_id, &cover) {
        warn!("Failed to save cover for {}: {e}", row.content_id);
    }
    Some(cover)
}

/// Extract and save covers for every archive that has none cached.
pub async fn warm_missing(pool: &DbPool, covers_dir: &Path) -> Result<usize, sqlx::Error> {
    let rows = archives::list_all(pool).await?;
    let covers_dir = covers_dir.to_path_buf();
    let warmed = tokio::task::spawn_blocking(move || {
        rows.iter()
            .filter(|row| !exists(&covers_dir, &row.content_id))
            .filter(|row| load_or_extract(&covers_dir, row).is_some())
            .count()
    })
    .await
    .unwrap_or_else(|e| {
        warn!("Cover warm-up task failed: {e}");
        0
    });
    if warmed > 0 {
        info!("Warmed {warmed} missing covers");
    }
    Ok(warmed)
}

fn image_mime(data: &[u8]) -> String {
    match content_type::sniff_bytes(data) {
        mt if content_type::is_image(mt) => content_type::mime(mt).to_string(),
        _ => "image/jpeg".to_string(),
    }
}

fn ext_to_mime(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn mime_to_ext(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}
