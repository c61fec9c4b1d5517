use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{RoomId, RoomRow};

/// Resolve the room for `password`, creating it on first use.
///
/// Concurrent first joins with the same password converge on one row: the
/// insert is a no-op when the password already exists.
pub async fn get_or_create_room(pool: &SqlitePool, password: &str) -> Result<RoomRow, sqlx::Error> {
    sqlx::query(
        "INSERT INTO rooms (password, created_at) VALUES (?, ?) \
         ON CONFLICT(password) DO NOTHING",
    )
    .bind(password)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    sqlx::query_as::<_, RoomRow>("SELECT id, password, created_at FROM rooms WHERE password = ?")
        .bind(password)
        .fetch_one(pool)
        .await
}

/// Look up a room by id.
pub async fn get_room(pool: &SqlitePool, room_id: RoomId) -> Result<Option<RoomRow>, sqlx::Error> {
    sqlx::query_as::<_, RoomRow>("SELECT id, password, created_at FROM rooms WHERE id = ?")
        .bind(room_id)
        .fetch_optional(pool)
        .await
}
