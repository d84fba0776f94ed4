mod http_tests;
mod importer_tests;
mod scheduler_tests;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use http_body_util::BodyExt;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

use tankobon::config::Config;
use tankobon::db::DbPool;
use tankobon::db::models::Archive;
use tankobon::db::queries::archives;
use tankobon::scheduler::{ImportScheduler, SchedulerState};
use tankobon::state::AppState;

/// Minimal PNG signature; enough for content sniffing.
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
/// Minimal JPEG signature.
pub const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\0\x10JFIF\0";

/// Build a Config watching `lib_dir` with covers in `covers_dir`.
pub fn test_config(lib_dir: &Path, covers_dir: &Path) -> Config {
    let toml_str = format!(
        r#"
[server]

[library]
folders = [{lib_dir:?}]
covers_path = {covers_dir:?}

[database]
url = "sqlite::memory:"

[scanner]
poll_interval_ms = 20
scan_on_startup = false

[reader]
page_retry_attempts = 2
page_retry_backoff_ms = 1
"#
    );
    toml::from_str(&toml_str).expect("test config should parse")
}

/// Build a Config with upload enabled into `upload_dir`.
pub fn test_config_with_upload(lib_dir: &Path, covers_dir: &Path, upload_dir: &Path) -> Config {
    let mut config = test_config(lib_dir, covers_dir);
    config.upload.allow_upload = true;
    config.upload.upload_path = upload_dir.to_path_buf();
    config.upload.max_upload_size_mb = 1;
    config
}

/// A temporary library, covers dir and in-memory catalog.
pub struct TestLibrary {
    pub lib: tempfile::TempDir,
    pub covers: tempfile::TempDir,
    pub pool: DbPool,
    pub config: Config,
}

impl TestLibrary {
    pub async fn new() -> Self {
        let lib = tempfile::tempdir().unwrap();
        let covers = tempfile::tempdir().unwrap();
        let config = test_config(lib.path(), covers.path());
        let pool = tankobon::db::create_test_pool().await;
        tankobon::db::queries::folders::sync(&pool, &config.library.folders)
            .await
            .unwrap();
        Self { lib, covers, pool, config }
    }

    pub fn root(&self) -> &Path {
        self.lib.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.lib.path().join(rel)
    }

    /// Write a zip with the given entries at `rel`, creating parent dirs.
    pub fn zip(&self, rel: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = self.path(rel);
        write_zip(&path, entries);
        path
    }

    pub async fn archive_at(&self, rel: &str) -> Option<Archive> {
        let folder = self.path(rel).to_string_lossy().to_string();
        archives::find_by_folder(&self.pool, &folder).await.unwrap()
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Poll until the scheduler is idle again.
pub async fn wait_idle(scheduler: &Arc<ImportScheduler>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while scheduler.state() != SchedulerState::Idle {
        assert!(
            tokio::time::Instant::now() < deadline,
            "scheduler did not return to idle"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn test_router(state: AppState) -> Router {
    tankobon::build_router(state)
}

/// Send a request with an optional JSON body and return the response.
pub async fn send(
    app: Router,
    method: &str,
    path: &str,
    json: Option<serde_json::Value>,
) -> axum::response::Response {
    let builder = axum::http::Request::builder().method(method).uri(path);
    let req = match json {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(req).await.unwrap()
}

pub async fn get(app: Router, path: &str) -> axum::response::Response {
    send(app, "GET", path, None).await
}

pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}
