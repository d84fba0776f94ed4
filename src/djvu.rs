use std::io::Cursor;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::scanner::parsers::{BookMeta, split_list, strip_meta};

const DEFAULT_JPEG_QUALITY: u8 = 85;

pub fn ddjvu_available() -> bool {
    tool_available("ddjvu")
}

pub fn djvused_available() -> bool {
    tool_available("djvused")
}

fn tool_available(name: &str) -> bool {
    Command::new(name)
        .arg("-h")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DjvuInfo {
    pub pages: i64,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: String,
}

impl DjvuInfo {
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

/// Page count and document metadata via `djvused -e "n; print-meta"`.
pub fn info(path: &Path) -> Result<DjvuInfo, DjvuError> {
    let output = Command::new("djvused")
        .arg(path)
        .arg("-e")
        .arg("n; print-meta")
        .stdin(Stdio::null())
        .output()
        .map_err(DjvuError::Spawn)?;
    if !output.status.success() {
        return Err(DjvuError::ExitStatus(output.status.code()));
    }
    Ok(parse_djvused(&String::from_utf8_lossy(&output.stdout)))
}

/// First line is the page count, the rest are `key "value"` pairs.
pub fn parse_djvused(text: &str) -> DjvuInfo {
    let mut info = DjvuInfo::default();
    let mut lines = text.lines();
    if let Some(first) = lines.next() {
        info.pages = first.trim().parse().unwrap_or(0);
    }
    for line in lines {
        let Some((key, value)) = line.trim().split_once(|c: char| c.is_whitespace()) else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value)
            .replace("\\\"", "\"");
        match key.to_ascii_lowercase().as_str() {
            "title" => info.title = value,
            "author" => info.author = value,
            "subject" => info.subject = value,
            "keywords" => info.keywords = value,
            _ => {}
        }
    }
    info
}

/// Render page `page` (1-based) to JPEG through ddjvu's PNM output.
pub fn render_page_jpeg(path: &Path, page: i64, scale_to: Option<u32>) -> Result<Vec<u8>, DjvuError> {
    if page < 1 {
        return Err(DjvuError::PageOutOfRange(page));
    }
    let mut cmd = Command::new("ddjvu");
    cmd.arg(format!("-page={page}")).arg("-format=ppm");
    if let Some(scale) = scale_to {
        cmd.arg(format!("-size={scale}x{scale}"));
    }
    let output = cmd
        .arg(path)
        .arg("-")
        .stdin(Stdio::null())
        .output()
        .map_err(DjvuError::Spawn)?;

    if !output.status.success() {
        return Err(DjvuError::ExitStatus(output.status.code()));
    }

    let image = image::load_from_memory_with_format(&output.stdout, image::ImageFormat::Pnm)
        .map_err(DjvuError::DecodeOutput)?;

    let mut jpeg = Cursor::new(Vec::new());
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, DEFAULT_JPEG_QUALITY);
    encoder
        .encode_image(&image)
        .map_err(DjvuError::EncodeJpeg)?;

    Ok(jpeg.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum DjvuError {
    #[error("failed to start DjVu tool: {0}")]
    Spawn(std::io::Error),
    #[error("DjVu tool exited with status {0:?}")]
    ExitStatus(Option<i32>),
    #[error("failed to decode ddjvu output: {0}")]
    DecodeOutput(image::ImageError),
    #[error("failed to encode JPEG: {0}")]
    EncodeJpeg(image::ImageError),
    #[error("page {0} out of range")]
    PageOutOfRange(i64),
}
