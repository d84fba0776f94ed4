use serde::Serialize;
use sqlx::FromRow;

/// Reserved separator between page entry names in a serialized page list.
pub const PAGE_DELIMITER: char = '\u{1F}';

/// Volume/chapter number not determined yet.
pub const UNKNOWN: f64 = -1.0;
/// Intentionally unnumbered (single, extra, special...).
pub const SINGLE_OR_EXTRA: f64 = -2.0;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Folder {
    pub id: i64,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Series {
    pub content_id: String,
    pub folder: String,
    pub title: String,
    pub is_single: bool,
    pub volumes_count: i64,
    pub chapters_count: i64,
    pub status: String,
    pub summary: String,
    pub links: String,
    pub categories: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Archive {
    pub content_id: String,
    pub series_id: String,
    pub folder: String,
    pub file_size: i64,
    pub book_type: String,
    pub is_book: bool,
    pub is_unique_content_id: bool,
    pub title: String,
    pub alt_title: String,
    pub authors: String,
    pub tags: String,
    pub summary: String,
    pub language: String,
    pub volume: f64,
    #[serde(skip)]
    pub page_entries: String,
    pub pages_count: i64,
    pub cover_entry: String,
    pub no_metadata: bool,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Archive {
    pub fn pages(&self) -> Vec<String> {
        split_pages(&self.page_entries)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Chapter {
    pub chapter_id: String,
    pub archive_id: String,
    pub series_id: String,
    pub title: String,
    pub chapter: f64,
    pub folder: String,
    #[serde(skip)]
    pub page_entries: String,
    pub pages_count: i64,
    pub created_at: String,
}

impl Chapter {
    pub fn pages(&self) -> Vec<String> {
        split_pages(&self.page_entries)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct History {
    pub id: i64,
    pub user_id: i64,
    pub content_id: String,
    pub pages_count: i64,
    pub current_page: i64,
    pub last_read_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Counter {
    pub name: String,
    pub value: i64,
    pub updated_at: String,
}

// Counter name constants
pub const COUNTER_ALL_SERIES: &str = "allseries";
pub const COUNTER_ALL_ARCHIVES: &str = "allarchives";
pub const COUNTER_ALL_CHAPTERS: &str = "allchapters";

pub fn join_pages(pages: &[String]) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            out.push(PAGE_DELIMITER);
        }
        out.push_str(page);
    }
    out
}

pub fn split_pages(serialized: &str) -> Vec<String> {
    if serialized.is_empty() {
        return Vec::new();
    }
    serialized.split(PAGE_DELIMITER).map(String::from).collect()
}

/// True once a volume/chapter value must no longer be touched by recognition.
pub fn is_number_settled(value: f64) -> bool {
    value == SINGLE_OR_EXTRA || value >= 0.0
}
