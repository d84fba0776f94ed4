use std::path::{Path, PathBuf};

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;

use crate::error::AppError;
use crate::scheduler::SchedulerError;
use crate::state::AppState;

/// Validate the extension of `filename` against a list of allowed extensions.
/// Returns `Some(lowercase_ext)` if valid, `None` otherwise.
fn validate_extension(filename: &str, allowed: &[String]) -> Option<String> {
    let ext = Path::new(filename)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    // Must be alphanumeric only
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
        Some(ext)
    } else {
        None
    }
}

/// Sanitise a filename stem: strip path components, keep safe characters only.
fn sanitize_filename(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy();
    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = sanitized.trim().trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// First free `{stem}.{ext}`, `{stem} (1).{ext}`, ... in `dir`.
fn free_destination(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}).{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// POST /uploader/upload
///
/// Stores the multipart `file` field in the upload folder and queues an
/// import of it.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let upload = &state.config.upload;
    if !upload.allow_upload {
        return Err(AppError::Forbidden);
    }
    let max_bytes = upload.max_upload_size_mb * 1024 * 1024;

    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        if bytes.len() as u64 > max_bytes {
            return Err(AppError::BadRequest("file too large".into()));
        }
        file = Some((filename, bytes.to_vec()));
    }

    let (filename, data) = match file {
        Some(f) if !f.1.is_empty() => f,
        _ => return Err(AppError::BadRequest("no file".into())),
    };
    let ext = validate_extension(&filename, &state.config.library.extensions)
        .ok_or_else(|| AppError::BadRequest(format!("unsupported file type: {filename}")))?;

    tokio::fs::create_dir_all(&upload.upload_path)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let dest = free_destination(&upload.upload_path, &sanitize_filename(&filename), &ext);
    tokio::fs::write(&dest, &data)
        .await
        .map_err(|e| AppError::Internal(format!("failed to write {}: {e}", dest.display())))?;
    tracing::info!("Uploaded {} ({} bytes)", dest.display(), data.len());

    let queued = match state.scheduler.rescan_path(&dest).await {
        Ok(n) => n > 0,
        Err(SchedulerError::AlreadyRunning) => {
            tracing::info!("Import busy; {} will be picked up by the next scan", dest.display());
            false
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "path": dest.to_string_lossy(),
            "queued": queued,
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_extension() {
        let allowed = vec!["cbz".to_string(), "pdf".to_string()];
        assert_eq!(validate_extension("Vol 1.CBZ", &allowed), Some("cbz".into()));
        assert_eq!(validate_extension("book.epub", &allowed), None);
        assert_eq!(validate_extension("noext", &allowed), None);
        assert_eq!(validate_extension("x.c-z", &allowed), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("Berserk v01 [x].cbz"), "Berserk v01 _x_");
        assert_eq!(sanitize_filename("...cbz"), "upload");
    }

    #[test]
    fn test_free_destination() {
        let dir = tempfile::tempdir().unwrap();
        let first = free_destination(dir.path(), "a", "cbz");
        assert_eq!(first, dir.path().join("a.cbz"));
        std::fs::write(&first, b"x").unwrap();
        assert_eq!(free_destination(dir.path(), "a", "cbz"), dir.path().join("a (1).cbz"));
    }
}
