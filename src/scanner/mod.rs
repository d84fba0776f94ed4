pub mod archive;
pub mod builder;
pub mod content_type;
pub mod identity;
pub mod parsers;
pub mod recognition;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, LibraryConfig};
use crate::covers;
use crate::db::DbPool;
use crate::db::models::{Archive, Series};
use crate::db::queries::{archives, chapters, counters, history, series};

use builder::{BuildContext, BuildOutcome, BuiltContent};
use identity::KnownArchives;
use parsers::sidecar;
use recognition::RecognitionOptions;

/// Library settings the importer needs, detached from the full config.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub extensions: HashSet<String>,
    pub covers_path: PathBuf,
    pub import_chapters: bool,
    pub recognition: RecognitionOptions,
}

impl From<&LibraryConfig> for ImportSettings {
    fn from(library: &LibraryConfig) -> Self {
        Self {
            extensions: library.extension_set(),
            covers_path: library.covers_path.clone(),
            import_chapters: library.import_chapters,
            recognition: RecognitionOptions {
                skip_singles: library.skip_singles,
                skip_extras: library.skip_extras,
            },
        }
    }
}

/// One unit of import work: a watched folder, optionally narrowed to a
/// single file or subfolder.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub root: PathBuf,
    pub target: Option<PathBuf>,
    pub reimport: bool,
    pub refresh_covers: bool,
}

impl ImportRequest {
    pub fn folder(root: impl Into<PathBuf>, reimport: bool, refresh_covers: bool) -> Self {
        Self {
            root: root.into(),
            target: None,
            reimport,
            refresh_covers,
        }
    }

    fn wants(&self, path: &Path) -> bool {
        self.target.as_ref().is_none_or(|t| path.starts_with(t))
    }
}

/// Per-file progress shared with whoever watches the batch.
#[derive(Debug, Default)]
pub struct Progress {
    pub total: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
}

impl Progress {
    pub fn reset(&self) {
        self.total.store(0, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }
}

/// Statistics collected while importing one folder.
#[derive(Debug, Default, Clone)]
pub struct ImportStats {
    pub files_found: u64,
    pub imported: u64,
    pub unchanged: u64,
    pub duplicates: u64,
    pub unsupported: u64,
    pub errors: u64,
    pub archives_deleted: u64,
    pub series_deleted: u64,
    pub history_repaired: u64,
    /// Series written or emptied during the pass.
    pub touched_series: HashSet<String>,
}

impl ImportStats {
    pub fn merge(&mut self, other: ImportStats) {
        self.files_found += other.files_found;
        self.imported += other.imported;
        self.unchanged += other.unchanged;
        self.duplicates += other.duplicates;
        self.unsupported += other.unsupported;
        self.errors += other.errors;
        self.archives_deleted += other.archives_deleted;
        self.series_deleted += other.series_deleted;
        self.history_repaired += other.history_repaired;
        self.touched_series.extend(other.touched_series);
    }
}

/// Import every watched folder once, then refresh derived data.
pub async fn run_scan(pool: &DbPool, config: &Config) -> Result<ImportStats, ScanError> {
    let settings = ImportSettings::from(&config.library);
    let progress = Progress::default();
    let mut stats = ImportStats::default();
    for root in &config.library.folders {
        let request = ImportRequest::folder(root, false, false);
        stats.merge(import_folder(pool, &settings, &request, &progress).await?);
    }
    finalize(pool, &stats.touched_series).await?;
    Ok(stats)
}

/// Recompute counts of touched series and the global counters.
pub async fn finalize(pool: &DbPool, touched: &HashSet<String>) -> Result<(), sqlx::Error> {
    for id in touched {
        series::update_counts(pool, id).await?;
    }
    counters::update_all(pool).await
}

/// Reconcile one watched folder with the catalog.
pub async fn import_folder(
    pool: &DbPool,
    settings: &ImportSettings,
    request: &ImportRequest,
    progress: &Progress,
) -> Result<ImportStats, ScanError> {
    let root = request.root.clone();
    if !root.is_dir() {
        return Err(ScanError::MissingRoot(root));
    }
    let root_str = root.to_string_lossy().to_string();
    info!("Importing {}", root.display());

    let mut stats = ImportStats::default();

    let walk_root = root.clone();
    let extensions = settings.extensions.clone();
    let files = tokio::task::spawn_blocking(move || collect_files(&walk_root, &extensions))
        .await
        .map_err(|e| ScanError::Internal(e.to_string()))?;
    stats.files_found = files.len() as u64;

    let on_disk: HashSet<String> = files
        .iter()
        .map(|(p, _)| p.to_string_lossy().to_string())
        .collect();
    let candidate_dirs: HashSet<PathBuf> = files
        .iter()
        .filter_map(|(p, _)| p.parent().map(Path::to_path_buf))
        .collect();

    // Archives whose file is gone.
    let catalogued = archives::list_under(pool, &root_str).await?;
    let (present, missing): (Vec<Archive>, Vec<Archive>) = catalogued
        .into_iter()
        .partition(|a| on_disk.contains(&a.folder));
    if !missing.is_empty() {
        let ids: Vec<String> = missing.iter().map(|a| a.content_id.clone()).collect();
        stats.archives_deleted = archives::delete_by_ids(pool, &ids).await?;
        for archive in &missing {
            debug!("Removed {} from catalog", archive.folder);
            covers::remove(&settings.covers_path, &archive.content_id);
            stats.touched_series.insert(archive.series_id.clone());
        }
    }

    // Series whose folder vanished or no longer holds candidates, and
    // series left without archives.
    let stale_series: Vec<String> = series::list_under(pool, &root_str)
        .await?
        .into_iter()
        .filter(|s| series_is_stale(s, &on_disk, &candidate_dirs))
        .map(|s| s.content_id)
        .chain(series::list_orphans(pool).await?)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if !stale_series.is_empty() {
        stats.series_deleted = series::delete_by_ids(pool, &stale_series).await?;
        for id in &stale_series {
            stats.touched_series.remove(id);
        }
    }

    let mut known = KnownArchives::from_pairs(archives::id_folder_pairs(pool).await?);
    let mut by_folder: HashMap<String, Archive> =
        present.into_iter().map(|a| (a.folder.clone(), a)).collect();

    let chosen: Vec<(PathBuf, u64)> = files
        .into_iter()
        .filter(|(path, _)| request.wants(path))
        .filter(|(path, size)| {
            let key = path.to_string_lossy();
            match by_folder.get(key.as_ref()) {
                None => true,
                Some(existing) if existing.deleted => request.reimport,
                Some(existing) => {
                    request.reimport || request.target.is_some() || existing.file_size != *size as i64
                }
            }
        })
        .collect();
    stats.unchanged = stats.files_found - chosen.len() as u64;
    progress.total.fetch_add(chosen.len() as u64, Ordering::SeqCst);
    debug!("{} of {} files need import", chosen.len(), stats.files_found);

    for (path, _) in chosen {
        let folder = path.to_string_lossy().to_string();
        let existing = by_folder.remove(&folder);
        let extract_cover = request.refresh_covers
            || existing
                .as_ref()
                .is_none_or(|a| !covers::exists(&settings.covers_path, &a.content_id));

        let build_path = path.clone();
        let build_existing = existing.clone();
        let reimport = request.reimport;
        let import_chapters = settings.import_chapters;
        let opts = settings.recognition;
        let joined = tokio::task::spawn_blocking(move || {
            let ctx = BuildContext {
                reimport,
                import_chapters,
                extract_cover,
                opts,
                known: &known,
                existing: build_existing.as_ref(),
            };
            let outcome = builder::build(&build_path, &ctx);
            (outcome, known)
        })
        .await;

        let outcome = match joined {
            Ok((outcome, returned)) => {
                known = returned;
                outcome
            }
            Err(e) => {
                // The known set went down with the task; rebuild it.
                warn!("Import task for {} failed: {e}", path.display());
                known = KnownArchives::from_pairs(archives::id_folder_pairs(pool).await?);
                stats.errors += 1;
                progress.failed.fetch_add(1, Ordering::SeqCst);
                progress.processed.fetch_add(1, Ordering::SeqCst);
                continue;
            }
        };

        match outcome {
            Ok(BuildOutcome::Built(content)) => {
                let single = path.parent() == Some(root.as_path());
                match persist(pool, settings, &path, single, *content, request.reimport).await {
                    Ok(persisted) => {
                        known.insert(persisted.content_id, folder);
                        stats.touched_series.insert(persisted.series_id);
                        stats.history_repaired += persisted.history_repaired;
                        stats.imported += 1;
                    }
                    Err(e) => {
                        warn!("Failed to store {}: {e}", path.display());
                        stats.errors += 1;
                        progress.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            Ok(BuildOutcome::Duplicate {
                content_id,
                existing_folder,
            }) => {
                debug!(
                    "Skipping {}: {content_id} already catalogued at {existing_folder}",
                    path.display()
                );
                stats.duplicates += 1;
            }
            Ok(BuildOutcome::Unsupported(media_type)) => {
                debug!("Skipping {}: unsupported content {media_type:?}", path.display());
                stats.unsupported += 1;
            }
            Err(e) => {
                warn!("Failed to import {}: {e}", path.display());
                stats.errors += 1;
                progress.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        progress.processed.fetch_add(1, Ordering::SeqCst);
    }

    info!(
        "Import of {} done: found={}, imported={}, unchanged={}, duplicates={}, deleted={}, errors={}",
        root.display(),
        stats.files_found,
        stats.imported,
        stats.unchanged,
        stats.duplicates,
        stats.archives_deleted,
        stats.errors
    );
    Ok(stats)
}

/// Candidate files below `root`, naturally sorted, with their sizes.
fn collect_files(root: &Path, extensions: &HashSet<String>) -> Vec<(PathBuf, u64)> {
    let mut files: Vec<(PathBuf, u64)> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
        })
        .map(|entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (entry.into_path(), size)
        })
        .collect();
    files.sort_by(|(a, _), (b, _)| archive::natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    files
}

fn series_is_stale(series: &Series, on_disk: &HashSet<String>, candidate_dirs: &HashSet<PathBuf>) -> bool {
    if series.is_single {
        return !on_disk.contains(&series.folder);
    }
    !candidate_dirs.contains(Path::new(&series.folder))
}

struct Persisted {
    content_id: String,
    series_id: String,
    history_repaired: u64,
}

/// Write one built file in a single transaction, then cache its cover.
async fn persist(
    pool: &DbPool,
    settings: &ImportSettings,
    path: &Path,
    single: bool,
    content: BuiltContent,
    reimport: bool,
) -> Result<Persisted, ScanError> {
    let BuiltContent {
        mut archive,
        chapters: mut new_chapters,
        series_title,
        cover,
    } = content;

    let new_series = if single {
        series::NewSeries {
            content_id: identity::single_series_hash(&archive.content_id),
            folder: archive.folder.clone(),
            title: series_title.unwrap_or_else(|| archive.title.clone()),
            is_single: true,
            links: "{}".to_string(),
            ..Default::default()
        }
    } else {
        let dir = path.parent().unwrap_or(path);
        let dir_str = dir.to_string_lossy().to_string();
        let existing = series::find_by_folder(pool, &dir_str).await?;
        let content_id = match &existing {
            Some(s) => s.content_id.clone(),
            None => {
                let dir = dir.to_path_buf();
                tokio::task::spawn_blocking(move || identity::folder_series_hash(&dir))
                    .await
                    .map_err(|e| ScanError::Internal(e.to_string()))?
            }
        };
        folder_series(dir, content_id, existing.as_ref(), series_title)
    };

    archive.series_id = new_series.content_id.clone();
    for chapter in &mut new_chapters {
        chapter.series_id = new_series.content_id.clone();
    }

    let mut tx = pool.begin().await?;
    series::upsert(&mut *tx, &new_series).await?;
    archives::upsert(&mut *tx, &archive).await?;
    chapters::replace_for_archive(&mut tx, &archive.content_id, &new_chapters, reimport).await?;
    let mut history_repaired =
        history::repair_for_content(&mut tx, &archive.content_id, archive.pages_count).await?;
    for chapter in &new_chapters {
        history_repaired +=
            history::repair_for_content(&mut tx, &chapter.chapter_id, chapter.pages_count).await?;
    }
    tx.commit().await?;

    if let Some(cover) = cover {
        if let Err(e) = covers::save(&settings.covers_path, &archive.content_id, &cover) {
            warn!("Failed to save cover for {}: {e}", archive.content_id);
        }
    }

    debug!("Stored {} as {}", path.display(), archive.content_id);
    Ok(Persisted {
        content_id: archive.content_id,
        series_id: new_series.content_id,
        history_repaired,
    })
}

/// Series row for a folder-grouped series. `series.json` wins, then the
/// stored row, then the item's own series title, then the folder name.
fn folder_series(
    dir: &Path,
    content_id: String,
    existing: Option<&Series>,
    series_title: Option<String>,
) -> series::NewSeries {
    let sidecar = sidecar::load_series(dir).unwrap_or_default();
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let title = Some(sidecar.title.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| existing.map(|s| s.title.clone()).filter(|t| !t.is_empty()))
        .or(series_title.filter(|t| !t.trim().is_empty()))
        .unwrap_or(dir_name);

    let links = sidecar.links_json();
    series::NewSeries {
        content_id,
        folder: dir.to_string_lossy().to_string(),
        title,
        is_single: false,
        status: pick(sidecar.status, existing.map(|s| &s.status)),
        summary: pick(sidecar.summary, existing.map(|s| &s.summary)),
        links: if links.is_empty() {
            existing
                .map(|s| s.links.clone())
                .unwrap_or_else(|| "{}".to_string())
        } else {
            links
        },
        categories: pick(sidecar.categories.join(", "), existing.map(|s| &s.categories)),
    }
}

fn pick(fresh: String, stored: Option<&String>) -> String {
    if fresh.is_empty() {
        stored.cloned().unwrap_or_default()
    } else {
        fresh
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("watched folder not found: {0}")]
    MissingRoot(PathBuf),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}
