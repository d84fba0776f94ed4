use sqlx::SqliteExecutor;

use crate::db::DbPool;
use crate::db::models::{
    COUNTER_ALL_ARCHIVES, COUNTER_ALL_CHAPTERS, COUNTER_ALL_SERIES, Counter,
};

pub async fn get<'e, E>(ex: E, name: &str) -> Result<Option<Counter>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Counter>("SELECT * FROM counters WHERE name = ?")
        .bind(name)
        .fetch_optional(ex)
        .await
}

pub async fn get_all<'e, E>(ex: E) -> Result<Vec<Counter>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Counter>("SELECT * FROM counters ORDER BY name")
        .fetch_all(ex)
        .await
}

pub async fn set<'e, E>(ex: E, name: &str, value: i64) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("UPDATE counters SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE name = ?")
        .bind(value)
        .bind(name)
        .execute(ex)
        .await?;
    Ok(())
}

/// Recalculate all counters from actual table counts.
pub async fn update_all(pool: &DbPool) -> Result<(), sqlx::Error> {
    let series: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM series")
        .fetch_one(pool)
        .await?;
    let archives: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM archives WHERE deleted = 0")
        .fetch_one(pool)
        .await?;
    let chapters: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM chapters c JOIN archives a ON a.content_id = c.archive_id \
         WHERE a.deleted = 0",
    )
    .fetch_one(pool)
    .await?;

    set(pool, COUNTER_ALL_SERIES, series.0).await?;
    set(pool, COUNTER_ALL_ARCHIVES, archives.0).await?;
    set(pool, COUNTER_ALL_CHAPTERS, chapters.0).await?;

    Ok(())
}
