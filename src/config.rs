use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub library: LibraryConfig,
    pub database: DatabaseConfig,
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    /// Watched folders. Each one is reconciled independently.
    pub folders: Vec<PathBuf>,
    #[serde(default = "default_covers_path", alias = "covers_dir")]
    pub covers_path: PathBuf,
    /// Split archives into chapters by their internal folders.
    #[serde(default = "default_true")]
    pub import_chapters: bool,
    /// Give "single"/"oneshot" items the SINGLE_OR_EXTRA sentinel.
    #[serde(default)]
    pub skip_singles: bool,
    /// Give "extra"/"special"/"omake" items the SINGLE_OR_EXTRA sentinel.
    #[serde(default)]
    pub skip_extras: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Minutes to fire at (0..=59). Empty = every minute.
    #[serde(default = "default_schedule_minutes")]
    pub schedule_minutes: Vec<u32>,
    /// Hours to fire at (0..=23). Empty = every hour.
    #[serde(default = "default_schedule_hours")]
    pub schedule_hours: Vec<u32>,
    /// Days of week to fire on (1=Mon..7=Sun, ISO). Empty = every day.
    #[serde(default)]
    pub schedule_day_of_week: Vec<u32>,
    /// Import workers. 0 = automatic (1 with chapters, CPU count without).
    #[serde(default)]
    pub workers_num: usize,
    /// Interval of the completion poller in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Run a full rescan right after startup.
    #[serde(default = "default_true")]
    pub scan_on_startup: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UploadConfig {
    #[serde(default)]
    pub allow_upload: bool,
    /// Where uploaded files land. Must sit inside one of the watched folders.
    #[serde(default)]
    pub upload_path: PathBuf,
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_page_retry_attempts")]
    pub page_retry_attempts: u32,
    #[serde(default = "default_page_retry_backoff_ms")]
    pub page_retry_backoff_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            page_retry_attempts: default_page_retry_attempts(),
            page_retry_backoff_ms: default_page_retry_backoff_ms(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(config)
    }
}

impl LibraryConfig {
    /// Lowercased extension pre-filter for candidate enumeration.
    pub fn extension_set(&self) -> std::collections::HashSet<String> {
        self.extensions.iter().map(|e| e.to_lowercase()).collect()
    }

    /// The watched folder containing `path`, if any.
    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.folders
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

impl ScannerConfig {
    /// Worker count: chapter import shares sequence counters and must stay
    /// on a single worker.
    pub fn effective_workers(&self, import_chapters: bool) -> usize {
        if self.workers_num > 0 {
            return self.workers_num;
        }
        if import_chapters {
            1
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_extensions() -> Vec<String> {
    vec![
        "7z", "rar", "zip", "cb7", "cbr", "cbz", "epub", "fb2", "pdf", "djvu",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_true() -> bool {
    true
}

fn default_db_url() -> String {
    "sqlite://tankobon.db?mode=rwc".to_string()
}

fn default_covers_path() -> PathBuf {
    PathBuf::from("covers")
}

fn default_schedule_minutes() -> Vec<u32> {
    vec![0]
}

fn default_schedule_hours() -> Vec<u32> {
    vec![0, 12]
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_upload_size_mb() -> u64 {
    500
}

fn default_page_retry_attempts() -> u32 {
    5
}

fn default_page_retry_backoff_ms() -> u64 {
    1000
}
