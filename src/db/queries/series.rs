use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};

use crate::db::models::Series;

use super::like_prefix;

/// Fields written on every import of a series.
#[derive(Debug, Clone, Default)]
pub struct NewSeries {
    pub content_id: String,
    pub folder: String,
    pub title: String,
    pub is_single: bool,
    pub status: String,
    pub summary: String,
    pub links: String,
    pub categories: String,
}

pub async fn get_by_id<'e, E>(ex: E, content_id: &str) -> Result<Option<Series>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Series>("SELECT * FROM series WHERE content_id = ?")
        .bind(content_id)
        .fetch_optional(ex)
        .await
}

/// Folder-grouped series living at `folder`. Single-item series are keyed by
/// their file path and never match a directory.
pub async fn find_by_folder<'e, E>(ex: E, folder: &str) -> Result<Option<Series>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Series>(
        "SELECT * FROM series WHERE folder = ? ORDER BY is_single, created_at LIMIT 1",
    )
    .bind(folder)
    .fetch_optional(ex)
    .await
}

/// Every series whose folder sits below `root`.
pub async fn list_under<'e, E>(ex: E, root: &str) -> Result<Vec<Series>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Series>(
        "SELECT * FROM series WHERE folder LIKE ? ESCAPE '\\' ORDER BY folder",
    )
    .bind(like_prefix(root))
    .fetch_all(ex)
    .await
}

pub async fn upsert<'e, E>(ex: E, series: &NewSeries) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO series (content_id, folder, title, is_single, status, summary, links, categories) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(content_id) DO UPDATE SET \
         folder = excluded.folder, title = excluded.title, is_single = excluded.is_single, \
         status = excluded.status, summary = excluded.summary, links = excluded.links, \
         categories = excluded.categories, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(&series.content_id)
    .bind(&series.folder)
    .bind(&series.title)
    .bind(series.is_single)
    .bind(&series.status)
    .bind(&series.summary)
    .bind(&series.links)
    .bind(&series.categories)
    .execute(ex)
    .await?;
    Ok(())
}

/// Recompute the derived volume/chapter counts of one series.
pub async fn update_counts<'e, E>(ex: E, content_id: &str) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "UPDATE series SET \
         volumes_count = (SELECT COUNT(*) FROM archives WHERE series_id = ?1 AND deleted = 0), \
         chapters_count = (SELECT COUNT(*) FROM chapters c JOIN archives a \
             ON a.content_id = c.archive_id WHERE c.series_id = ?1 AND a.deleted = 0) \
         WHERE content_id = ?1",
    )
    .bind(content_id)
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
    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM series WHERE content_id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");
    let result = qb.build().execute(ex).await?;
    Ok(result.rows_affected())
}

/// Series left without any archive.
pub async fn list_orphans<'e, E>(ex: E) -> Result<Vec<String>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT s.content_id FROM series s \
         WHERE NOT EXISTS (SELECT 1 FROM archives a WHERE a.series_id = s.content_id)",
    )
    .fetch_all(ex)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
