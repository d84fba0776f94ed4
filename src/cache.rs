//! Resolved readable items keyed by archive or chapter id.

use std::sync::Arc;

use dashmap::DashMap;

use crate::db::DbPool;
use crate::db::queries::{archives, chapters};
use crate::scanner::content_type::BookType;

/// Everything the page server needs to open one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadableItem {
    /// Id the item was requested by: an archive or a chapter.
    pub content_id: String,
    pub archive_id: String,
    pub path: String,
    pub book_type: BookType,
    pub pages: Vec<String>,
    pub pages_count: i64,
}

#[derive(Default)]
pub struct ItemCache {
    items: DashMap<String, Arc<ReadableItem>>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, content_id: &str) -> Option<Arc<ReadableItem>> {
        self.items.get(content_id).map(|r| Arc::clone(r.value()))
    }

    /// Cached item, or a fresh lookup of a chapter then an archive.
    /// Logically deleted archives resolve to nothing.
    pub async fn resolve(
        &self,
        pool: &DbPool,
        content_id: &str,
    ) -> Result<Option<Arc<ReadableItem>>, sqlx::Error> {
        if let Some(item) = self.get(content_id) {
            return Ok(Some(item));
        }

        let item = if let Some(chapter) = chapters::get_by_id(pool, content_id).await? {
            match archives::get_by_id(pool, &chapter.archive_id).await? {
                Some(archive) if !archive.deleted => Some(ReadableItem {
                    content_id: chapter.chapter_id.clone(),
                    archive_id: archive.content_id.clone(),
                    path: archive.folder.clone(),
                    book_type: BookType::parse(&archive.book_type),
                    pages: chapter.pages(),
                    pages_count: chapter.pages_count,
                }),
                _ => None,
            }
        } else {
            match archives::get_by_id(pool, content_id).await? {
                Some(archive) if !archive.deleted => Some(ReadableItem {
                    content_id: archive.content_id.clone(),
                    archive_id: archive.content_id.clone(),
                    path: archive.folder.clone(),
                    book_type: BookType::parse(&archive.book_type),
                    pages: archive.pages(),
                    pages_count: archive.pages_count,
                }),
                _ => None,
            }
        };

        Ok(item.map(|item| {
            let item = Arc::new(item);
            self.items.insert(content_id.to_string(), Arc::clone(&item));
            item
        }))
    }

    /// Drop an archive and every chapter entry pointing at it.
    pub fn evict(&self, archive_id: &str) {
        self.items.retain(|_, item| item.archive_id != archive_id);
    }

    pub fn invalidate(&self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
