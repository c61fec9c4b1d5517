use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{ActiveUserRow, RoomId};

/// Mark `username` active in a room, refreshing `last_seen` if already present.
pub async fn upsert_presence(
    pool: &SqlitePool,
    room_id: RoomId,
    user_id: Option<i64>,
    username: &str,
) -> Result<ActiveUserRow, sqlx::Error> {
    sqlx::query_as::<_, ActiveUserRow>(
        "INSERT INTO active_users (room_id, user_id, username, last_seen) VALUES (?, ?, ?, ?) \
         ON CONFLICT(room_id, username) DO UPDATE SET last_seen = excluded.last_seen, \
         user_id = COALESCE(excluded.user_id, active_users.user_id) \
         RETURNING id, room_id, user_id, username, last_seen",
    )
    .bind(room_id)
    .bind(user_id)
    .bind(username)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
}

/// Presence records of a room.
pub async fn list_active(pool: &SqlitePool, room_id: RoomId) -> Result<Vec<ActiveUserRow>, sqlx::Error> {
    sqlx::query_as::<_, ActiveUserRow>(
        "SELECT id, room_id, user_id, username, last_seen \
         FROM active_users WHERE room_id = ? ORDER BY id",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await
}

/// Number of presence records in a room.
pub async fn count_active(pool: &SqlitePool, room_id: RoomId) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM active_users WHERE room_id = ?")
        .bind(room_id)
        .fetch_one(pool)
        .await
}

/// Remove a presence record. Absent records are not an error.
pub async fn remove_presence(pool: &SqlitePool, room_id: RoomId, username: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM active_users WHERE room_id = ? AND username = ?")
        .bind(room_id)
        .bind(username)
        .execute(pool)
        .await?;
    Ok(())
}

/// Refresh `last_seen` without creating a record.
pub async fn touch_presence(pool: &SqlitePool, room_id: RoomId, username: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE active_users SET last_seen = ? WHERE room_id = ? AND username = ?")
        .bind(Utc::now())
        .bind(room_id)
        .bind(username)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete every record, in any room, last seen before `cutoff`.
pub async fn sweep_stale(pool: &SqlitePool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM active_users WHERE last_seen < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
