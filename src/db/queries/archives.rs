use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};

use crate::db::models::Archive;

use super::like_prefix;

#[derive(Debug, Clone, Default)]
pub struct NewArchive {
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
    pub page_entries: String,
    pub pages_count: i64,
    pub cover_entry: String,
    pub no_metadata: bool,
}

pub async fn get_by_id<'e, E>(ex: E, content_id: &str) -> Result<Option<Archive>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Archive>("SELECT * FROM archives WHERE content_id = ?")
        .bind(content_id)
        .fetch_optional(ex)
        .await
}

pub async fn find_by_folder<'e, E>(ex: E, folder: &str) -> Result<Option<Archive>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Archive>("SELECT * FROM archives WHERE folder = ?")
        .bind(folder)
        .fetch_optional(ex)
        .await
}

/// Every archive (logically deleted included) whose file sits below `root`.
pub async fn list_under<'e, E>(ex: E, root: &str) -> Result<Vec<Archive>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Archive>(
        "SELECT * FROM archives WHERE folder LIKE ? ESCAPE '\\' ORDER BY folder",
    )
    .bind(like_prefix(root))
    .fetch_all(ex)
    .await
}

pub async fn list_all<'e, E>(ex: E) -> Result<Vec<Archive>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Archive>("SELECT * FROM archives WHERE deleted = 0 ORDER BY folder")
        .fetch_all(ex)
        .await
}

/// `(content_id, folder)` for the whole catalog. Feeds the duplicate guard.
pub async fn id_folder_pairs<'e, E>(ex: E) -> Result<Vec<(String, String)>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as("SELECT content_id, folder FROM archives")
        .fetch_all(ex)
        .await
}

/// Insert or refresh an archive. A refreshed archive is visible again.
pub async fn upsert<'e, E>(ex: E, archive: &NewArchive) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO archives (content_id, series_id, folder, file_size, book_type, is_book, \
         is_unique_content_id, title, alt_title, authors, tags, summary, language, volume, \
         page_entries, pages_count, cover_entry, no_metadata) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(content_id) DO UPDATE SET \
         series_id = excluded.series_id, folder = excluded.folder, \
         file_size = excluded.file_size, book_type = excluded.book_type, \
         is_book = excluded.is_book, is_unique_content_id = excluded.is_unique_content_id, \
         title = excluded.title, alt_title = excluded.alt_title, authors = excluded.authors, \
         tags = excluded.tags, summary = excluded.summary, language = excluded.language, \
         volume = excluded.volume, page_entries = excluded.page_entries, \
         pages_count = excluded.pages_count, cover_entry = excluded.cover_entry, \
         no_metadata = excluded.no_metadata, deleted = 0, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&archive.content_id)
    .bind(&archive.series_id)
    .bind(&archive.folder)
    .bind(archive.file_size)
    .bind(&archive.book_type)
    .bind(archive.is_book)
    .bind(archive.is_unique_content_id)
    .bind(&archive.title)
    .bind(&archive.alt_title)
    .bind(&archive.authors)
    .bind(&archive.tags)
    .bind(&archive.summary)
    .bind(&archive.language)
    .bind(archive.volume)
    .bind(&archive.page_entries)
    .bind(archive.pages_count)
    .bind(&archive.cover_entry)
    .bind(archive.no_metadata)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn set_deleted<'e, E>(ex: E, content_id: &str, deleted: bool) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE archives SET deleted = ?, updated_at = CURRENT_TIMESTAMP WHERE content_id = ?",
    )
    .bind(deleted)
    .bind(content_id)
    .execute(ex)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Hard delete. Chapters go with their archive through the foreign key.
pub async fn delete_by_ids<'e, E>(ex: E, ids: &[String]) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    if ids.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM archives WHERE content_id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
    let result = qb.build().execute(ex).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::db::queries::{chapters, series};

    fn sample(id: &str, series_id: &str, folder: &str) -> NewArchive {
        NewArchive {
            content_id: id.to_string(),
            series_id: series_id.to_string(),
            folder: folder.to_string(),
            file_size: 100,
            book_type: "archive".to_string(),
            title: "Vol".to_string(),
            volume: -1.0,
            page_entries: "01.jpg".to_string(),
            pages_count: 1,
            ..Default::default()
        }
    }

    async fn seed_series(pool: &crate::db::DbPool, id: &str, folder: &str) {
        series::upsert(
            pool,
            &series::NewSeries {
                content_id: id.to_string(),
                folder: folder.to_string(),
                title: "S".to_string(),
                links: "{}".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row_per_id() {
        let pool = create_test_pool().await;
        seed_series(&pool, "s", "/lib/s").await;
        archives_upsert_twice(&pool).await;

        let all = list_under(&pool, "/lib").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_size, 200);
        assert_eq!(all[0].volume, 3.0);
    }

    async fn archives_upsert_twice(pool: &crate::db::DbPool) {
        upsert(pool, &sample("a1", "s", "/lib/s/v1.cbz")).await.unwrap();
        let mut changed = sample("a1", "s", "/lib/s/v1.cbz");
        changed.file_size = 200;
        changed.volume = 3.0;
        upsert(pool, &changed).await.unwrap();
    }

    #[tokio::test]
    async fn test_logical_delete_hides_and_upsert_restores() {
        let pool = create_test_pool().await;
        seed_series(&pool, "s", "/lib/s").await;
        upsert(&pool, &sample("a1", "s", "/lib/s/v1.cbz")).await.unwrap();

        assert!(set_deleted(&pool, "a1", true).await.unwrap());
        assert!(list_all(&pool).await.unwrap().is_empty());
        assert_eq!(list_under(&pool, "/lib").await.unwrap().len(), 1);

        upsert(&pool, &sample("a1", "s", "/lib/s/v1.cbz")).await.unwrap();
        assert!(!get_by_id(&pool, "a1").await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chapters() {
        let pool = create_test_pool().await;
        seed_series(&pool, "s", "/lib/s").await;
        upsert(&pool, &sample("a1", "s", "/lib/s/v1.cbz")).await.unwrap();
        upsert(&pool, &sample("a2", "s", "/lib/s/v2.cbz")).await.unwrap();
        chapters::upsert(
            &pool,
            &chapters::NewChapter {
                chapter_id: "c1".to_string(),
                archive_id: "a1".to_string(),
                series_id: "s".to_string(),
                title: "Chapter 1".to_string(),
                chapter: 1.0,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(id_folder_pairs(&pool).await.unwrap().len(), 2);

        assert_eq!(delete_by_ids(&pool, &["a1".to_string()]).await.unwrap(), 1);
        assert!(chapters::get_by_id(&pool, "c1").await.unwrap().is_none());
        assert_eq!(id_folder_pairs(&pool).await.unwrap().len(), 1);
    }
}
