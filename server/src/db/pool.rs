use sqlx::Connection;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Ordered schema migrations. Versions must be strictly increasing.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_initial.sql"))];

/// Create a SQLite connection pool with WAL mode and foreign keys enforced.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    info!(%database_url, max_connections, "database connected");
    Ok(pool)
}

/// Apply every migration newer than the recorded schema version.
///
/// Each migration runs in its own transaction together with its
/// `schema_version` row, so a failed migration leaves no partial schema.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (\
            version     INTEGER PRIMARY KEY, \
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))\
        )",
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;

    let mut conn = pool.acquire().await?;
    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current_version) {
        info!(version, "applying migration");
        let mut tx = conn.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }

    let latest = MIGRATIONS.last().map(|m| m.0).unwrap_or(0);
    info!(version = latest, "database schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_core_tables_created() {
        let pool = setup_db().await;

        for table in ["rooms", "messages", "active_users", "schema_version"] {
            let exists: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert!(exists, "table {table} should exist");
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = setup_db().await;
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn test_presence_unique_per_room_and_username() {
        let pool = setup_db().await;
        sqlx::query("INSERT INTO rooms (id, password, created_at) VALUES (1, 'secret1', '2024-01-01')")
            .execute(&pool)
            .await
            .unwrap();
        let insert = "INSERT INTO active_users (room_id, username, last_seen) VALUES (1, 'astrid', '2024-01-01')";
        sqlx::query(insert).execute(&pool).await.unwrap();

        assert!(sqlx::query(insert).execute(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_message_type_is_constrained() {
        let pool = setup_db().await;
        sqlx::query("INSERT INTO rooms (id, password, created_at) VALUES (1, 'secret1', '2024-01-01')")
            .execute(&pool)
            .await
            .unwrap();

        let result = sqlx::query(
            "INSERT INTO messages (room_id, username, content, type, created_at) \
             VALUES (1, 'astrid', 'hi', 'video', '2024-01-01')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
