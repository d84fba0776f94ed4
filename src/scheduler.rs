//! Import worker pool and the periodic rescan trigger.
//!
//! One batch at a time: `Idle -> Running -> Draining -> Idle`. Completion is
//! observed by a poller, not signalled by the workers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Datelike, Local, Timelike};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::cache::ItemCache;
use crate::config::{Config, LibraryConfig, ScannerConfig};
use crate::covers;
use crate::db::DbPool;
use crate::db::queries::{archives, folders};
use crate::scanner::{self, ImportRequest, ImportSettings, ImportStats, Progress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    pub files_total: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub last_batch: Option<BatchSummary>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub folders: u64,
    pub imported: u64,
    pub unchanged: u64,
    pub duplicates: u64,
    pub deleted: u64,
    pub errors: u64,
    pub finished_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("an import is already running")]
    AlreadyRunning,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("path is outside every watched folder: {0}")]
    OutsideLibrary(PathBuf),
    #[error("import queue is closed")]
    QueueClosed,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Work shared between the scheduler handle, its workers and the poller.
struct Shared {
    pool: DbPool,
    settings: ImportSettings,
    cache: Arc<ItemCache>,
    state: Mutex<SchedulerState>,
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    progress: Progress,
    batch: Mutex<ImportStats>,
    last_batch: Mutex<Option<BatchSummary>>,
}

pub struct ImportScheduler {
    shared: Arc<Shared>,
    sender: mpsc::Sender<ImportRequest>,
    library: LibraryConfig,
    poll_interval: Duration,
}

impl ImportScheduler {
    /// Create the scheduler and spawn its workers. Must run inside a Tokio
    /// runtime.
    pub fn start(pool: DbPool, config: &Config, cache: Arc<ItemCache>) -> Arc<Self> {
        let workers = config
            .scanner
            .effective_workers(config.library.import_chapters);
        let (sender, receiver) = mpsc::channel(config.scanner.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let shared = Arc::new(Shared {
            pool,
            settings: ImportSettings::from(&config.library),
            cache,
            state: Mutex::new(SchedulerState::Idle),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            progress: Progress::default(),
            batch: Mutex::new(ImportStats::default()),
            last_batch: Mutex::new(None),
        });

        for id in 0..workers {
            let shared = Arc::clone(&shared);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move { worker(id, shared, receiver).await });
        }
        info!("Import scheduler started with {workers} worker(s)");

        Arc::new(Self {
            shared,
            sender,
            library: config.library.clone(),
            poll_interval: Duration::from_millis(config.scanner.poll_interval_ms.max(1)),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SchedulerStatus {
        let shared = &self.shared;
        SchedulerStatus {
            state: self.state(),
            queued: shared.queued.load(Ordering::SeqCst),
            active: shared.active.load(Ordering::SeqCst),
            completed: shared.completed.load(Ordering::SeqCst),
            files_total: shared.progress.total.load(Ordering::SeqCst),
            files_processed: shared.progress.processed.load(Ordering::SeqCst),
            files_failed: shared.progress.failed.load(Ordering::SeqCst),
            last_batch: shared
                .last_batch
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Queue every watched folder.
    pub async fn rescan_all(&self, reimport: bool, refresh_covers: bool) -> Result<usize, SchedulerError> {
        let requests = folders::get_all(&self.shared.pool)
            .await?
            .into_iter()
            .map(|f| ImportRequest::folder(f.path, reimport, refresh_covers))
            .collect();
        self.submit(requests).await
    }

    pub async fn rescan_folder(
        &self,
        folder_id: i64,
        reimport: bool,
        refresh_covers: bool,
    ) -> Result<usize, SchedulerError> {
        let folder = folders::get_by_id(&self.shared.pool, folder_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("folder {folder_id}")))?;
        self.submit(vec![ImportRequest::folder(folder.path, reimport, refresh_covers)])
            .await
    }

    /// Re-import one catalogued archive from its file.
    pub async fn rescan_item(&self, content_id: &str) -> Result<usize, SchedulerError> {
        let archive = archives::get_by_id(&self.shared.pool, content_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("item {content_id}")))?;
        let request = self.request_for(Path::new(&archive.folder), true, true)?;
        self.submit(vec![request]).await
    }

    /// Import a file or folder that appeared below a watched folder.
    pub async fn rescan_path(&self, path: &Path) -> Result<usize, SchedulerError> {
        let request = self.request_for(path, false, false)?;
        self.submit(vec![request]).await
    }

    fn request_for(&self, path: &Path, reimport: bool, refresh_covers: bool) -> Result<ImportRequest, SchedulerError> {
        let root = self
            .library
            .root_for(path)
            .ok_or_else(|| SchedulerError::OutsideLibrary(path.to_path_buf()))?;
        Ok(ImportRequest {
            root: root.to_path_buf(),
            target: Some(path.to_path_buf()),
            reimport,
            refresh_covers,
        })
    }

    /// Start a batch. An empty batch leaves the scheduler idle.
    async fn submit(&self, requests: Vec<ImportRequest>) -> Result<usize, SchedulerError> {
        if requests.is_empty() {
            return Ok(0);
        }
        {
            let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != SchedulerState::Idle {
                return Err(SchedulerError::AlreadyRunning);
            }
            *state = SchedulerState::Running;
        }

        let shared = &self.shared;
        shared.completed.store(0, Ordering::SeqCst);
        shared.progress.reset();
        *shared.batch.lock().unwrap_or_else(PoisonError::into_inner) = ImportStats::default();

        let count = requests.len();
        shared.queued.fetch_add(count, Ordering::SeqCst);
        info!("Import batch started: {count} folder(s)");

        tokio::spawn(poll_completion(Arc::clone(&self.shared), self.poll_interval));

        for (sent, request) in requests.into_iter().enumerate() {
            if self.sender.send(request).await.is_err() {
                // Nothing will pick up the rest; count them as done.
                let lost = count - sent;
                shared.queued.fetch_sub(lost, Ordering::SeqCst);
                shared.completed.fetch_add(lost as u64, Ordering::SeqCst);
                return Err(SchedulerError::QueueClosed);
            }
        }
        Ok(count)
    }
}

async fn worker(
    id: usize,
    shared: Arc<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ImportRequest>>>,
) {
    loop {
        let request = { receiver.lock().await.recv().await };
        let Some(request) = request else {
            debug!("Import worker {id} stopping");
            return;
        };
        // Active goes up before queued goes down so the poller never sees
        // an empty pool in between.
        shared.active.fetch_add(1, Ordering::SeqCst);
        shared.queued.fetch_sub(1, Ordering::SeqCst);

        debug!("Worker {id} importing {}", request.root.display());
        match scanner::import_folder(&shared.pool, &shared.settings, &request, &shared.progress).await {
            Ok(stats) => shared
                .batch
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .merge(stats),
            Err(e) => warn!("Import of {} failed: {e}", request.root.display()),
        }

        shared.completed.fetch_add(1, Ordering::SeqCst);
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wait until the pool is idle with the queue empty, then drain.
async fn poll_completion(shared: Arc<Shared>, interval: Duration) {
    loop {
        sleep(interval).await;
        let idle = shared.active.load(Ordering::SeqCst) == 0
            && shared.queued.load(Ordering::SeqCst) == 0
            && shared.completed.load(Ordering::SeqCst) > 0;
        if idle {
            break;
        }
    }
    drain(&shared).await;
}

async fn drain(shared: &Arc<Shared>) {
    *shared.state.lock().unwrap_or_else(PoisonError::into_inner) = SchedulerState::Draining;

    let stats = std::mem::take(&mut *shared.batch.lock().unwrap_or_else(PoisonError::into_inner));
    if let Err(e) = scanner::finalize(&shared.pool, &stats.touched_series).await {
        warn!("Failed to refresh counters after import: {e}");
    }
    shared.cache.invalidate();

    let pool = shared.pool.clone();
    let covers_path = shared.settings.covers_path.clone();
    tokio::spawn(async move {
        if let Err(e) = covers::warm_missing(&pool, &covers_path).await {
            warn!("Cover warm-up failed: {e}");
        }
    });

    let summary = BatchSummary {
        folders: shared.completed.load(Ordering::SeqCst),
        imported: stats.imported,
        unchanged: stats.unchanged,
        duplicates: stats.duplicates,
        deleted: stats.archives_deleted,
        errors: stats.errors,
        finished_at: Local::now().to_rfc3339(),
    };
    info!(
        "Import batch finished: folders={}, imported={}, unchanged={}, duplicates={}, deleted={}, errors={}",
        summary.folders,
        summary.imported,
        summary.unchanged,
        summary.duplicates,
        summary.deleted,
        summary.errors
    );
    *shared.last_batch.lock().unwrap_or_else(PoisonError::into_inner) = Some(summary);
    *shared.state.lock().unwrap_or_else(PoisonError::into_inner) = SchedulerState::Idle;
}

/// Validate scanner schedule config values at startup.
pub fn validate_config(config: &ScannerConfig) -> Result<(), String> {
    for &m in &config.schedule_minutes {
        if m > 59 {
            return Err(format!(
                "scanner.schedule_minutes: {m} is out of range 0..=59"
            ));
        }
    }
    for &h in &config.schedule_hours {
        if h > 23 {
            return Err(format!(
                "scanner.schedule_hours: {h} is out of range 0..=23"
            ));
        }
    }
    for &d in &config.schedule_day_of_week {
        if !(1..=7).contains(&d) {
            return Err(format!(
                "scanner.schedule_day_of_week: {d} is out of range 1..=7 (Mon=1..Sun=7)"
            ));
        }
    }
    if config.queue_capacity == 0 {
        return Err("scanner.queue_capacity must be at least 1".to_string());
    }
    Ok(())
}

/// Check whether the current local time matches the schedule.
fn matches_schedule(config: &ScannerConfig) -> bool {
    let now = Local::now();
    schedule_matches(config, now.minute(), now.hour(), now.weekday().number_from_monday())
}

fn schedule_matches(config: &ScannerConfig, minute: u32, hour: u32, dow: u32) -> bool {
    let minute_ok = config.schedule_minutes.is_empty() || config.schedule_minutes.contains(&minute);
    let hour_ok = config.schedule_hours.is_empty() || config.schedule_hours.contains(&hour);
    let dow_ok =
        config.schedule_day_of_week.is_empty() || config.schedule_day_of_week.contains(&dow);

    minute_ok && hour_ok && dow_ok
}

fn format_list(values: &[u32]) -> String {
    if values.is_empty() {
        return "*".to_string();
    }
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Format the schedule for logging.
pub fn format_schedule(config: &ScannerConfig) -> String {
    let minutes = format_list(&config.schedule_minutes);
    let hours = format_list(&config.schedule_hours);
    let dow = if config.schedule_day_of_week.is_empty() {
        "*".to_string()
    } else {
        let names = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
        config
            .schedule_day_of_week
            .iter()
            .map(|&d| *names.get((d - 1) as usize).unwrap_or(&"?"))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!("minutes=[{minutes}] hours=[{hours}] days=[{dow}]")
}

/// Run the schedule loop. Wakes at every minute boundary and starts a
/// rescan when the schedule matches.
pub async fn run(scheduler: Arc<ImportScheduler>, config: ScannerConfig) {
    info!("Scheduler started: {}", format_schedule(&config));

    loop {
        // Sleep until the start of the next minute
        let now = Local::now();
        let secs_into_minute = now.second();
        let nanos_into_second = now.nanosecond().min(999_999_999);
        let wait = Duration::from_secs(60 - secs_into_minute as u64)
            - Duration::from_nanos(nanos_into_second as u64);
        sleep(wait).await;

        if matches_schedule(&config) {
            info!("Scheduled rescan triggered");
            match scheduler.rescan_all(false, false).await {
                Ok(n) => debug!("Scheduled rescan queued {n} folder(s)"),
                Err(SchedulerError::AlreadyRunning) => {
                    warn!("Scheduled rescan skipped: import already running");
                }
                Err(e) => warn!("Scheduled rescan failed: {e}"),
            }
        }
    }
}
