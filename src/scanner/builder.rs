//! One pass over one file: detect, iterate, extract, hash, group.
//!
//! Runs on a blocking thread. Nothing here touches the database; the
//! importer persists what comes back.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use tracing::{debug, warn};

use super::archive::{self, ArchiveError, natural_cmp, sort_natural};
use super::content_type::{self, BookType, MediaType};
use super::identity::{self, Identity, IdentityInput, KnownArchives};
use super::parsers::sidecar::{self, ChapterSidecar};
use super::parsers::{BookMeta, comicinfo, epub, fb2};
use super::recognition::{self, RecognitionOptions};
use crate::db::models::{Archive, UNKNOWN, is_number_settled, join_pages};
use crate::db::queries::archives::NewArchive;
use crate::db::queries::chapters::NewChapter;
use crate::{djvu, pdf};

const COVER_SCALE: u32 = 600;

/// Per-file inputs the importer gathers before a build.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub reimport: bool,
    pub import_chapters: bool,
    pub extract_cover: bool,
    pub opts: RecognitionOptions,
    pub known: &'a KnownArchives,
    /// Catalog row already stored at this path.
    pub existing: Option<&'a Archive>,
}

#[derive(Debug, Clone)]
pub struct CoverImage {
    pub data: Vec<u8>,
    pub mime: String,
}

/// Archive row and chapters built from one file. Series ids are left blank
/// for the importer to fill in.
#[derive(Debug, Clone)]
pub struct BuiltContent {
    pub archive: NewArchive,
    pub chapters: Vec<NewChapter>,
    pub series_title: Option<String>,
    pub cover: Option<CoverImage>,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Built(Box<BuiltContent>),
    Duplicate { content_id: String, existing_folder: String },
    Unsupported(MediaType),
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Entries of interest collected while iterating a container.
#[derive(Default)]
struct Scratch {
    comicinfo: Option<Vec<u8>>,
    opf: Option<(String, Vec<u8>)>,
    container: Option<Vec<u8>>,
    book_json: Option<Vec<u8>>,
    chapter_json: HashMap<String, Vec<u8>>,
    pages: Vec<String>,
    buckets: BTreeMap<String, Vec<String>>,
    cover: Option<(String, Option<Vec<u8>>)>,
    cover_preferred: bool,
}

pub fn build(path: &Path, ctx: &BuildContext<'_>) -> Result<BuildOutcome, BuildError> {
    let file_size = std::fs::metadata(path)?.len() as i64;
    let media_type = content_type::sniff(path);
    let book_type = BookType::from(media_type);
    if book_type == BookType::Unknown {
        return Ok(BuildOutcome::Unsupported(media_type));
    }

    let folder = path.to_string_lossy().to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let external = read_external_sidecar(path);
    let mut scratch = Scratch::default();
    let mut meta: Option<BookMeta> = None;
    let mut pages_count = 0i64;
    let mut cover: Option<CoverImage> = None;

    match book_type {
        BookType::Archive | BookType::Epub => {
            scan_container(path, media_type, external.is_none(), ctx.extract_cover, &mut scratch)?;
            if external.is_none() {
                meta = container_meta(&scratch, book_type);
            }
            pages_count = scratch.pages.len() as i64;
        }
        BookType::Fb2 => {
            let data = std::fs::read(path)?;
            match fb2::parse(data.as_slice()) {
                Ok(mut m) => {
                    if ctx.extract_cover {
                        if let Some(data) = m.cover_data.take() {
                            cover = Some(CoverImage { data, mime: m.cover_type.clone() });
                        }
                    }
                    if external.is_none() && !m.is_empty() {
                        meta = Some(m);
                    }
                }
                Err(e) => warn!("FB2 metadata unreadable in {}: {e}", path.display()),
            }
        }
        BookType::Pdf => {
            match pdf::info(path) {
                Ok(info) => {
                    pages_count = info.pages;
                    if external.is_none() {
                        meta = Some(info.to_meta()).filter(|m| !m.is_empty());
                    }
                }
                Err(e) => warn!("pdfinfo failed on {}: {e}", path.display()),
            }
            if ctx.extract_cover && pages_count > 0 {
                cover = pdf::render_page_jpeg(path, 1, Some(COVER_SCALE))
                    .inspect_err(|e| debug!("PDF cover render failed for {}: {e}", path.display()))
                    .ok()
                    .map(|data| CoverImage { data, mime: "image/jpeg".to_string() });
            }
        }
        BookType::DjVu => {
            match djvu::info(path) {
                Ok(info) => {
                    pages_count = info.pages;
                    if external.is_none() {
                        meta = Some(info.to_meta()).filter(|m| !m.is_empty());
                    }
                }
                Err(e) => warn!("djvused failed on {}: {e}", path.display()),
            }
            if ctx.extract_cover && pages_count > 0 {
                cover = djvu::render_page_jpeg(path, 1, Some(COVER_SCALE))
                    .inspect_err(|e| debug!("DjVu cover render failed for {}: {e}", path.display()))
                    .ok()
                    .map(|data| CoverImage { data, mime: "image/jpeg".to_string() });
            }
        }
        BookType::Unknown => {}
    }

    let meta = external.or(meta);

    let candidate = match ctx.existing {
        Some(_) => identity::item_hash(path),
        None => identity::new_item_hash(path, ctx.known),
    };
    let old_hash = identity::path_hash(identity::ITEM_TAG, path);
    let resolved = identity::resolve(
        IdentityInput {
            folder: &folder,
            candidate: &candidate,
            old_hash: &old_hash,
            explicit: meta.as_ref().and_then(|m| m.id.as_deref()),
            existing: ctx.existing.map(|a| a.content_id.as_str()),
            reimport: ctx.reimport,
        },
        ctx.known,
    );
    let (content_id, unique) = match resolved {
        Identity::Assigned { content_id, unique } => (content_id, unique),
        Identity::Duplicate { content_id, existing_folder } => {
            return Ok(BuildOutcome::Duplicate { content_id, existing_folder });
        }
    };

    let no_metadata = meta.is_none();
    let mut meta = meta.unwrap_or_default();
    if no_metadata {
        warn!("No metadata in {}, using file name", path.display());
    }
    if meta.title.is_empty() {
        meta.title = stem.clone();
    }

    let mut volume = ctx.existing.map(|a| a.volume).unwrap_or(UNKNOWN);
    if !is_number_settled(volume) {
        if let Some(v) = meta.volume.filter(|v| *v >= 0.0) {
            volume = v;
        }
    }
    volume = recognition::parse_volume_number(&stem, volume, ctx.opts);
    volume = recognition::parse_volume_number(&meta.title, volume, ctx.opts);

    let mut cover_entry = String::new();
    if book_type == BookType::Archive || book_type == BookType::Epub {
        let epub_cover = meta.cover_entry.clone().filter(|_| book_type == BookType::Epub);
        if let Some(entry) = epub_cover {
            if ctx.extract_cover {
                cover = archive::read_entry(path, media_type, &entry)
                    .inspect_err(|e| debug!("EPUB cover {entry} unreadable in {}: {e}", path.display()))
                    .ok()
                    .map(|data| CoverImage { mime: image_mime(&data), data });
            }
            cover_entry = entry;
        } else if let Some((entry, data)) = scratch.cover.take() {
            if let Some(data) = data {
                cover = Some(CoverImage { mime: image_mime(&data), data });
            }
            cover_entry = entry;
        }
    }

    let chapters = if ctx.import_chapters && book_type == BookType::Archive {
        build_chapters(&content_id, &meta, &mut scratch, ctx.opts)
    } else {
        Vec::new()
    };

    debug!(
        "Built {} as {content_id}: {} pages, {} chapters, volume {volume}",
        path.display(),
        pages_count,
        chapters.len()
    );

    let archive = NewArchive {
        content_id,
        series_id: String::new(),
        folder,
        file_size,
        book_type: book_type.as_str().to_string(),
        is_book: book_type.is_book(),
        is_unique_content_id: unique,
        title: meta.title,
        alt_title: meta.alt_title,
        authors: meta.authors.join(", "),
        tags: meta.tags.join(", "),
        summary: meta.summary,
        language: meta.language,
        volume,
        page_entries: join_pages(&scratch.pages),
        pages_count,
        cover_entry,
        no_metadata,
    };

    Ok(BuildOutcome::Built(Box::new(BuiltContent {
        archive,
        chapters,
        series_title: meta.series_title,
        cover,
    })))
}

fn read_external_sidecar(path: &Path) -> Option<BookMeta> {
    let sidecar_path = sidecar::external_book_path(path);
    if sidecar_path == path {
        return None;
    }
    let data = std::fs::read(&sidecar_path).ok()?;
    match sidecar::parse_book(&data) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!("Ignoring sidecar {}: {e}", sidecar_path.display());
            None
        }
    }
}

/// Single pass over the container collecting pages, metadata files and the
/// cover candidate.
fn scan_container(
    path: &Path,
    media_type: MediaType,
    want_meta: bool,
    want_cover: bool,
    scratch: &mut Scratch,
) -> Result<(), ArchiveError> {
    let mut iter = archive::open(path, media_type)?;
    while iter.next_entry()? {
        if iter.entry_is_dir() {
            continue;
        }
        let name = iter.entry_name().to_string();
        let base = name.rsplit('/').next().unwrap_or(&name).to_string();
        let lower = base.to_lowercase();

        if content_type::is_image_name(&name) {
            let dir = match name.rfind('/') {
                Some(i) => name[..i].to_string(),
                None => String::new(),
            };
            scratch.buckets.entry(dir).or_default().push(name.clone());
            scratch.pages.push(name.clone());

            let preferred = is_preferred_cover(&lower);
            if scratch.cover.is_none() || (preferred && !scratch.cover_preferred) {
                let data = if want_cover {
                    match iter.read_entry() {
                        Ok(data) => Some(data),
                        Err(e) => {
                            debug!("Cover candidate {name} unreadable: {e}");
                            None
                        }
                    }
                } else {
                    None
                };
                scratch.cover = Some((name, data));
                scratch.cover_preferred = preferred;
            }
            continue;
        }

        if !want_meta {
            continue;
        }
        let slot_free = match lower.as_str() {
            "comicinfo.xml" => scratch.comicinfo.is_none(),
            "container.xml" if name == "META-INF/container.xml" => scratch.container.is_none(),
            sidecar::BOOK_FILE => scratch.book_json.is_none(),
            sidecar::CHAPTER_FILE => true,
            _ if lower.ends_with(".opf") => scratch.opf.is_none(),
            _ => false,
        };
        if !slot_free {
            continue;
        }
        let data = match iter.read_entry() {
            Ok(data) => data,
            Err(e) => {
                debug!("Skipping unreadable entry {name} in {}: {e}", path.display());
                continue;
            }
        };
        match lower.as_str() {
            "comicinfo.xml" => scratch.comicinfo = Some(data),
            "container.xml" => scratch.container = Some(data),
            sidecar::BOOK_FILE => scratch.book_json = Some(data),
            sidecar::CHAPTER_FILE => {
                let dir = name.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
                scratch.chapter_json.insert(dir.to_string(), data);
            }
            _ => scratch.opf = Some((name, data)),
        }
    }

    sort_natural(&mut scratch.pages);
    for pages in scratch.buckets.values_mut() {
        sort_natural(pages);
    }
    Ok(())
}

/// Page names starting at index zero or mentioning a cover beat the first image.
fn is_preferred_cover(base_lower: &str) -> bool {
    let stem = base_lower.rsplit_once('.').map(|(s, _)| s).unwrap_or(base_lower);
    stem.contains("cover") || (!stem.is_empty() && stem.bytes().all(|b| b == b'0'))
}

/// First metadata source that parses wins.
fn container_meta(scratch: &Scratch, book_type: BookType) -> Option<BookMeta> {
    if let Some(data) = &scratch.comicinfo {
        match comicinfo::parse(data) {
            Ok(meta) => return Some(meta),
            Err(e) => warn!("Invalid ComicInfo.xml: {e}"),
        }
    }

    if let Some((name, data)) = &scratch.opf {
        let opf_path = if book_type == BookType::Epub {
            scratch
                .container
                .as_deref()
                .and_then(epub::parse_container_xml)
                .unwrap_or_else(|| name.clone())
        } else {
            name.clone()
        };
        match epub::parse_opf(data, &opf_path) {
            Ok(meta) => return Some(meta),
            Err(e) => warn!("Invalid OPF {name}: {e}"),
        }
    }

    if let Some(data) = &scratch.book_json {
        match sidecar::parse_book(data) {
            Ok(meta) => return Some(meta),
            Err(e) => warn!("Invalid {}: {e}", sidecar::BOOK_FILE),
        }
    }
    None
}

fn build_chapters(
    archive_id: &str,
    meta: &BookMeta,
    scratch: &mut Scratch,
    opts: RecognitionOptions,
) -> Vec<NewChapter> {
    let mut dirs: Vec<String> = scratch.buckets.keys().cloned().collect();
    dirs.sort_by(|a, b| natural_cmp(a, b));
    let single_bucket = dirs.len() == 1;

    let mut seen = HashSet::new();
    let mut chapters = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let Some(pages) = scratch.buckets.remove(&dir) else {
            continue;
        };
        let sidecar = scratch
            .chapter_json
            .get(&dir)
            .and_then(|data| match sidecar::parse_chapter(data) {
                Ok(ch) => Some(ch),
                Err(e) => {
                    warn!("Invalid {} in {dir}: {e}", sidecar::CHAPTER_FILE);
                    None
                }
            })
            .unwrap_or_default();

        let title = chapter_title(&sidecar, &dir, &meta.title);
        let mut chapter_id = sidecar
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| identity::chapter_id(archive_id, &title));
        if !seen.insert(chapter_id.clone()) {
            chapter_id = identity::chapter_id(archive_id, &dir);
            seen.insert(chapter_id.clone());
        }

        let mut current = sidecar.chapter.unwrap_or(UNKNOWN);
        if single_bucket && !is_number_settled(current) {
            current = meta.chapter.filter(|c| *c >= 0.0).unwrap_or(UNKNOWN);
        }
        let titles = [meta.title.as_str(), meta.alt_title.as_str()];
        let number = recognition::parse_chapter_number(&titles, &title, current, opts);

        chapters.push(NewChapter {
            chapter_id,
            archive_id: archive_id.to_string(),
            series_id: String::new(),
            title,
            chapter: number,
            folder: dir,
            pages_count: pages.len() as i64,
            page_entries: join_pages(&pages),
        });
    }
    chapters
}

fn chapter_title(sidecar: &ChapterSidecar, dir: &str, archive_title: &str) -> String {
    if !sidecar.title.trim().is_empty() {
        return sidecar.title.trim().to_string();
    }
    match dir.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => archive_title.to_string(),
    }
}

fn image_mime(data: &[u8]) -> String {
    match content_type::sniff_bytes(data) {
        mt if content_type::is_image(mt) => content_type::mime(mt).to_string(),
        _ => "image/jpeg".to_string(),
    }
}
