use std::path::Path;

use sqlx::SqliteExecutor;

use crate::db::DbPool;
use crate::db::models::Folder;

pub async fn get_by_id<'e, E>(ex: E, id: i64) -> Result<Option<Folder>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Folder>("SELECT * FROM folders WHERE id = ?")
        .bind(id)
        .fetch_optional(ex)
        .await
}

pub async fn get_all<'e, E>(ex: E) -> Result<Vec<Folder>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_as::<_, Folder>("SELECT * FROM folders ORDER BY id")
        .fetch_all(ex)
        .await
}

/// Register every configured folder and drop rows for folders that left
/// the configuration. Returns the resulting folder list.
pub async fn sync<P: AsRef<Path>>(pool: &DbPool, paths: &[P]) -> Result<Vec<Folder>, sqlx::Error> {
    let wanted: Vec<String> = paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy().trim_end_matches('/').to_string())
        .collect();

    for path in &wanted {
        let name = Path::new(path)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        sqlx::query("INSERT OR IGNORE INTO folders (path, name) VALUES (?, ?)")
            .bind(path)
            .bind(&name)
            .execute(pool)
            .await?;
    }

    for folder in get_all(pool).await? {
        if !wanted.contains(&folder.path) {
            sqlx::query("DELETE FROM folders WHERE id = ?")
                .bind(folder.id)
                .execute(pool)
                .await?;
        }
    }

    get_all(pool).await
}
