//! Streams single pages out of catalogued items.
//!
//! Reads run on blocking threads. Transient I/O failures (a dropped network
//! share, a half-written file) are retried a bounded number of times.

use std::future::Future;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{ItemCache, ReadableItem};
use crate::config::ReaderConfig;
use crate::db::DbPool;
use crate::djvu::{self, DjvuError};
use crate::pdf::{self, PdfError};
use crate::scanner::archive::{self, ArchiveError};
use crate::scanner::content_type::{self, BookType};

const CONVERT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub struct PageServer {
    attempts: u32,
    backoff: Duration,
}

impl PageServer {
    pub fn new(config: &ReaderConfig) -> Self {
        Self {
            attempts: config.page_retry_attempts.max(1),
            backoff: Duration::from_millis(config.page_retry_backoff_ms),
        }
    }

    /// Page `n` (1-based) of an archive or chapter.
    pub async fn page(
        &self,
        pool: &DbPool,
        cache: &ItemCache,
        content_id: &str,
        n: i64,
        convert: bool,
    ) -> Result<Page, PageError> {
        let item = cache
            .resolve(pool, content_id)
            .await?
            .ok_or_else(|| PageError::NotFound(content_id.to_string()))?;

        let available = match item.book_type {
            BookType::Pdf | BookType::DjVu => item.pages_count,
            _ => item.pages.len() as i64,
        };
        if n < 1 || n > available {
            return Err(PageError::OutOfRange { page: n, pages: available });
        }

        let data = retry(self.attempts, self.backoff, || {
            let item = Arc::clone(&item);
            async move {
                tokio::task::spawn_blocking(move || read_page(&item, n))
                    .await
                    .map_err(|e| ReadError::Io(std::io::Error::other(e.to_string())))?
            }
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                warn!("Page {n} of {content_id} failed after {attempts} attempts: {last}");
                PageError::ReadFailed { attempts, reason: last.to_string() }
            }
            RetryError::Fatal(e) => PageError::ReadFailed { attempts: 1, reason: e.to_string() },
        })?;

        let entry = item.pages.get((n - 1) as usize).cloned().unwrap_or_default();
        let page = if convert {
            tokio::task::spawn_blocking(move || convert_if_needed(data, &entry))
                .await
                .map_err(|e| PageError::ReadFailed { attempts: 1, reason: e.to_string() })?
        } else {
            let mime = detect_mime(&data, &entry);
            Page { data, mime }
        };
        Ok(page)
    }
}

/// Blocking read of one page.
fn read_page(item: &ReadableItem, n: i64) -> Result<Vec<u8>, ReadError> {
    let path = Path::new(&item.path);
    match item.book_type {
        BookType::Pdf => Ok(pdf::render_page_jpeg(path, n, None)?),
        BookType::DjVu => Ok(djvu::render_page_jpeg(path, n, None)?),
        _ => {
            let entry = item
                .pages
                .get((n - 1) as usize)
                .ok_or(ReadError::Archive(ArchiveError::NoEntry))?;
            let media_type = content_type::sniff(path);
            debug!("Reading {entry} from {}", item.path);
            Ok(archive::read_entry(path, media_type, entry)?)
        }
    }
}

/// Mime type from the page bytes, else from the entry name.
fn detect_mime(data: &[u8], entry: &str) -> String {
    match content_type::sniff_bytes(data) {
        mt if content_type::is_image(mt) => content_type::mime(mt).to_string(),
        _ => mime_guess::from_path(entry)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Re-encode formats browsers struggle with as JPEG. Undecodable input is
/// served as is.
fn convert_if_needed(data: Vec<u8>, entry: &str) -> Page {
    let media_type = content_type::sniff_bytes(&data);
    if !content_type::needs_conversion(media_type) {
        let mime = detect_mime(&data, entry);
        return Page { data, mime };
    }
    let converted = image::load_from_memory(&data).ok().and_then(|img| {
        let mut out = Cursor::new(Vec::new());
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, CONVERT_JPEG_QUALITY);
        encoder.encode_image(&img.to_rgb8()).ok()?;
        Some(out.into_inner())
    });
    match converted {
        Some(jpeg) => Page { data: jpeg, mime: "image/jpeg".to_string() },
        None => {
            debug!("Could not convert {media_type:?} page, serving original");
            Page { data, mime: content_type::mime(media_type).to_string() }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Pdf(#[from] PdfError),
    #[error(transparent)]
    Djvu(#[from] DjvuError),
}

impl ReadError {
    /// Failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        let io = match self {
            ReadError::Io(e) => Some(e),
            ReadError::Archive(ArchiveError::Io(e)) => Some(e),
            ReadError::Archive(ArchiveError::Zip(::zip::result::ZipError::Io(e))) => Some(e),
            _ => None,
        };
        if let Some(e) = io {
            if matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        self.to_string().to_lowercase().contains("stream closed")
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Fatal(E),
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `attempts` tries are used up, sleeping `backoff` between tries.
pub async fn retry<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T, RetryError<ReadError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReadError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= attempts => {
                return Err(RetryError::Exhausted { attempts: attempt, last: e });
            }
            Err(e) => {
                debug!("Transient read failure (attempt {attempt}/{attempts}): {e}");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("page {page} out of range (1..={pages})")]
    OutOfRange { page: i64, pages: i64 },
    #[error("page read failed after {attempts} attempt(s): {reason}")]
    ReadFailed { attempts: u32, reason: String },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}
