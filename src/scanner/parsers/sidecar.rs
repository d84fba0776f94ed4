use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{BookMeta, strip_meta};

pub const BOOK_FILE: &str = "book.json";
pub const CHAPTER_FILE: &str = "chapter.json";
pub const SERIES_FILE: &str = "series.json";

/// Book-level JSON sidecar, stored inside the container as `book.json` or
/// beside the file as `<stem>.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BookSidecar {
    pub id: Option<String>,
    pub title: String,
    pub alt_title: String,
    pub series: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub authors: Vec<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub tags: Vec<String>,
    pub summary: String,
    pub language: String,
    pub volume: Option<f64>,
    pub chapter: Option<f64>,
}

impl From<BookSidecar> for BookMeta {
    fn from(b: BookSidecar) -> Self {
        BookMeta {
            id: b.id.filter(|id| !id.trim().is_empty()),
            title: strip_meta(&b.title),
            alt_title: b.alt_title,
            series_title: b.series,
            authors: b.authors,
            tags: b.tags.into_iter().map(|t| t.to_lowercase()).collect(),
            summary: b.summary,
            language: b.language,
            volume: b.volume,
            chapter: b.chapter,
            ..Default::default()
        }
    }
}

/// Per-folder chapter sidecar inside a container.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChapterSidecar {
    pub id: Option<String>,
    pub title: String,
    pub chapter: Option<f64>,
}

/// Series-level sidecar in the series folder.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeriesSidecar {
    pub title: String,
    pub status: String,
    pub summary: String,
    pub links: serde_json::Map<String, serde_json::Value>,
    #[serde(deserialize_with = "string_or_list")]
    pub categories: Vec<String>,
}

impl SeriesSidecar {
    pub fn links_json(&self) -> String {
        if self.links.is_empty() {
            return String::new();
        }
        serde_json::Value::Object(self.links.clone()).to_string()
    }
}

pub fn parse_book(data: &[u8]) -> Result<BookMeta, serde_json::Error> {
    serde_json::from_slice::<BookSidecar>(data).map(BookMeta::from)
}

pub fn parse_chapter(data: &[u8]) -> Result<ChapterSidecar, serde_json::Error> {
    serde_json::from_slice(data)
}

pub fn parse_series(data: &[u8]) -> Result<SeriesSidecar, serde_json::Error> {
    serde_json::from_slice(data)
}

/// `<stem>.json` next to `file`.
pub fn external_book_path(file: &Path) -> PathBuf {
    file.with_extension("json")
}

/// Read the series sidecar of `dir`, if any. A malformed file is ignored.
pub fn load_series(dir: &Path) -> Option<SeriesSidecar> {
    let data = std::fs::read(dir.join(SERIES_FILE)).ok()?;
    match parse_series(&data) {
        Ok(series) => Some(series),
        Err(e) => {
            tracing::warn!("ignoring {}: {e}", dir.join(SERIES_FILE).display());
            None
        }
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => super::split_list(&s),
        OneOrMany::Many(v) => v
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_book() {
        let meta = parse_book(
            br#"{"id":"abc","title":"Vol 1","authors":"A, B","tags":["Drama"],"volume":1}"#,
        )
        .unwrap();
        assert_eq!(meta.id.as_deref(), Some("abc"));
        assert_eq!(meta.title, "Vol 1");
        assert_eq!(meta.authors, vec!["A", "B"]);
        assert_eq!(meta.tags, vec!["drama"]);
        assert_eq!(meta.volume, Some(1.0));
        assert!(meta.chapter.is_none());
    }

    #[test]
    fn test_blank_id_is_dropped() {
        let meta = parse_book(br#"{"id":"  ","title":"x"}"#).unwrap();
        assert!(meta.id.is_none());
        assert!(parse_book(b"not json").is_err());
    }

    #[test]
    fn test_series_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_series(dir.path()).is_none());

        std::fs::write(
            dir.path().join(SERIES_FILE),
            br#"{"title":"Berserk","status":"ongoing","links":{"mal":"2"},"categories":["seinen","dark"]}"#,
        )
        .unwrap();
        let series = load_series(dir.path()).unwrap();
        assert_eq!(series.title, "Berserk");
        assert_eq!(series.categories, vec!["seinen", "dark"]);
        assert_eq!(series.links_json(), r#"{"mal":"2"}"#);
    }

    #[test]
    fn test_chapter_sidecar_and_paths() {
        let ch = parse_chapter(br#"{"title":"Prologue","chapter":0.5}"#).unwrap();
        assert_eq!(ch.title, "Prologue");
        assert_eq!(ch.chapter, Some(0.5));
        assert_eq!(
            external_book_path(Path::new("/lib/a/v1.cbz")),
            PathBuf::from("/lib/a/v1.json")
        );
    }
}
