use sqlx::{SqliteConnection, SqliteExecutor};

use crate::db::models::History;

/// Record a reading position, creating the row on first read.
pub async fn save<'e, E>(
    ex: E,
    user_id: i64,
    content_id: &str,
    pages_count: i64,
    current_page: i64,
) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO history (user_id, content_id, pages_count, current_page) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(user_id, content_id) DO UPDATE SET \
         pages_count = excluded.pages_count, current_page = excluded.current_page, \
         last_read_at = CURRENT_TIMESTAMP",
    )
    .bind(user_id)
    .bind(content_id)
    .bind(pages_count)
    .bind(current_page)
    .execute(ex)
    .await?;
    Ok(())
}

pub async fn get<'e, E>(ex: E, user_id: i64, content_id: &str) -> Result<Option<History>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, History>("SELECT * FROM history WHERE user_id = ? AND content_id = ?")
        .bind(user_id)
        .bind(content_id)
        .fetch_optional(ex)
        .await
}

pub async fn list_for_content<'e, E>(ex: E, content_id: &str) -> Result<Vec<History>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, History>("SELECT * FROM history WHERE content_id = ? ORDER BY user_id")
        .bind(content_id)
        .fetch_all(ex)
        .await
}

/// The `(pages_count, current_page)` a row must hold for a target with
/// `pages` pages, or `None` when it is already consistent.
pub fn repaired(row: &History, pages: i64) -> Option<(i64, i64)> {
    if row.pages_count == pages && row.current_page <= pages {
        return None;
    }
    Some((pages, row.current_page.min(pages)))
}

/// Bring every history row of `content_id` in line with its page count.
/// Returns the number of rows changed.
pub async fn repair_for_content(
    conn: &mut SqliteConnection,
    content_id: &str,
    pages: i64,
) -> Result<u64, sqlx::Error> {
    let rows = list_for_content(&mut *conn, content_id).await?;
    let mut changed = 0;
    for row in rows {
        let Some((pages_count, current_page)) = repaired(&row, pages) else {
            continue;
        };
        sqlx::query("UPDATE history SET pages_count = ?, current_page = ? WHERE id = ?")
            .bind(pages_count)
            .bind(current_page)
            .bind(row.id)
            .execute(&mut *conn)
            .await?;
        changed += 1;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn row(pages_count: i64, current_page: i64) -> History {
        History {
            id: 1,
            user_id: 1,
            content_id: "x".to_string(),
            pages_count,
            current_page,
            last_read_at: String::new(),
        }
    }

    #[test]
    fn test_repaired_consistent_row_is_noop() {
        assert_eq!(repaired(&row(20, 5), 20), None);
        assert_eq!(repaired(&row(20, 20), 20), None);
    }

    #[test]
    fn test_repaired_clamps_and_backfills() {
        assert_eq!(repaired(&row(30, 25), 20), Some((20, 20)));
        assert_eq!(repaired(&row(0, 3), 20), Some((20, 3)));
        assert_eq!(repaired(&row(20, 25), 20), Some((20, 20)));
    }

    #[tokio::test]
    async fn test_repair_is_idempotent() {
        let pool = create_test_pool().await;
        save(&pool, 1, "x", 30, 25).await.unwrap();
        save(&pool, 2, "x", 20, 4).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(repair_for_content(&mut conn, "x", 20).await.unwrap(), 1);
        assert_eq!(repair_for_content(&mut conn, "x", 20).await.unwrap(), 0);
        drop(conn);

        let first = get(&pool, 1, "x").await.unwrap().unwrap();
        assert_eq!((first.pages_count, first.current_page), (20, 20));
    }
}
