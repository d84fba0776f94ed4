use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::scanner::parsers::{BookMeta, split_list, strip_meta};

const DEFAULT_JPEG_QUALITY: u8 = 85;

pub fn pdftoppm_available() -> bool {
    tool_available("pdftoppm")
}

pub fn pdfinfo_available() -> bool {
    tool_available("pdfinfo")
}

fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Fields of the PDF info dictionary we care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfInfo {
    pub pages: i64,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: String,
}

impl PdfInfo {
    pub fn to_meta(&self) -> BookMeta {
        BookMeta {
            title: strip_meta(&self.title),
            authors: split_list(&self.author),
            summary: self.subject.clone(),
            tags: split_list(&self.keywords)
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect(),
            ..Default::default()
        }
    }
}

pub fn info(path: &Path) -> Result<PdfInfo, PdfError> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(PdfError::Spawn)?;
    if !output.status.success() {
        return Err(PdfError::ExitStatus(output.status.code()));
    }
    Ok(parse_pdfinfo(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `pdfinfo` output (`Key:   value` lines).
pub fn parse_pdfinfo(text: &str) -> PdfInfo {
    let mut info = PdfInfo::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "Pages" => info.pages = value.parse().unwrap_or(0),
            "Title" => info.title = value,
            "Author" => info.author = value,
            "Subject" => info.subject = value,
            "Keywords" => info.keywords = value,
            _ => {}
        }
    }
    info
}

/// Render page `page` (1-based) to JPEG. `scale_to` bounds the longest side.
pub fn render_page_jpeg(path: &Path, page: i64, scale_to: Option<u32>) -> Result<Vec<u8>, PdfError> {
    if page < 1 {
        return Err(PdfError::PageOutOfRange(page));
    }
    let temp_dir = temp_work_dir();
    std::fs::create_dir_all(&temp_dir).map_err(PdfError::CreateTempDir)?;
    let _cleanup = TempDirCleanup(temp_dir.clone());

    let output_base = temp_dir.join("page");
    let output_jpg = temp_dir.join("page.jpg");

    let mut cmd = Command::new("pdftoppm");
    cmd.arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-singlefile")
        .arg("-jpeg")
        .arg("-jpegopt")
        .arg(format!("quality={DEFAULT_JPEG_QUALITY}"));
    if let Some(scale) = scale_to {
        cmd.arg("-scale-to").arg(scale.to_string());
    }
    let status = cmd
        .arg(path)
        .arg(&output_base)
        .stdin(Stdio::null())
        .status()
        .map_err(PdfError::Spawn)?;

    if !status.success() {
        return Err(PdfError::ExitStatus(status.code()));
    }

    std::fs::read(&output_jpg).map_err(PdfError::ReadOutput)
}

static WORK_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

fn temp_work_dir() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = WORK_DIR_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "tankobon-pdfpage-{}-{now}-{seq}",
        std::process::id()
    ))
}

struct TempDirCleanup(PathBuf);

impl Drop for TempDirCleanup {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            tracing::debug!("Failed to cleanup temp PDF dir {:?}: {}", self.0, e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("failed to create temp dir: {0}")]
    CreateTempDir(std::io::Error),
    #[error("failed to start PDF tool: {0}")]
    Spawn(std::io::Error),
    #[error("PDF tool exited with status {0:?}")]
    ExitStatus(Option<i32>),
    #[error("failed to read rendered JPEG: {0}")]
    ReadOutput(std::io::Error),
    #[error("page {0} out of range")]
    PageOutOfRange(i64),
}
