use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqliteExecutor};

use crate::db::models::Chapter;

#[derive(Debug, Clone, Default)]
pub struct NewChapter {
    pub chapter_id: String,
    pub archive_id: String,
    pub series_id: String,
    pub title: String,
    pub chapter: f64,
    pub folder: String,
    pub page_entries: String,
    pub pages_count: i64,
}

pub async fn get_by_id<'e, E>(ex: E, chapter_id: &str) -> Result<Option<Chapter>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE chapter_id = ?")
        .bind(chapter_id)
        .fetch_optional(ex)
        .await
}

pub async fn list_by_archive<'e, E>(ex: E, archive_id: &str) -> Result<Vec<Chapter>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Chapter>(
        "SELECT * FROM chapters WHERE archive_id = ? ORDER BY chapter, folder",
    )
    .bind(archive_id)
    .fetch_all(ex)
    .await
}

pub async fn upsert<'e, E>(ex: E, chapter: &NewChapter) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO chapters (chapter_id, archive_id, series_id, title, chapter, folder, \
         page_entries, pages_count) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(chapter_id) DO UPDATE SET \
         archive_id = excluded.archive_id, series_id = excluded.series_id, \
         title = excluded.title, chapter = excluded.chapter, folder = excluded.folder, \
         page_entries = excluded.page_entries, pages_count = excluded.pages_count",
    )
    .bind(&chapter.chapter_id)
    .bind(&chapter.archive_id)
    .bind(&chapter.series_id)
    .bind(&chapter.title)
    .bind(chapter.chapter)
    .bind(&chapter.folder)
    .bind(&chapter.page_entries)
    .bind(chapter.pages_count)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn delete_by_ids<'e, E>(ex: E, ids: &[String]) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    if ids.is_empty() {
        return Ok(0);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM chapters WHERE chapter_id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
    let result = qb.build().execute(ex).await?;
    Ok(result.rows_affected())
}

/// Replace the chapter set of one archive.
///
/// Chapters absent from `chapters` are removed. A chapter that already
/// exists is only rewritten when `overwrite` is set.
pub async fn replace_for_archive(
    conn: &mut SqliteConnection,
    archive_id: &str,
    chapters: &[NewChapter],
    overwrite: bool,
) -> Result<(), sqlx::Error> {
    let existing = list_by_archive(&mut *conn, archive_id).await?;

    let stale: Vec<String> = existing
        .iter()
        .filter(|c| !chapters.iter().any(|n| n.chapter_id == c.chapter_id))
        .map(|c| c.chapter_id.clone())
        .collect();
    delete_by_ids(&mut *conn, &stale).await?;

    for chapter in chapters {
        let present = existing.iter().any(|c| c.chapter_id == chapter.chapter_id);
        if present && !overwrite {
            continue;
        }
        upsert(&mut *conn, chapter).await?;
    }
    Ok(())
}
