use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{MessageRow, NewMessage, RoomId};

/// Insert a message and return it with its store-assigned id and timestamp.
pub async fn insert_message(pool: &SqlitePool, msg: &NewMessage<'_>) -> Result<MessageRow, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (room_id, user_id, username, content, type, file_public_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         RETURNING id, room_id, user_id, username, content, type, file_public_id, created_at",
    )
    .bind(msg.room_id)
    .bind(msg.user_id)
    .bind(msg.username)
    .bind(msg.content)
    .bind(msg.kind)
    .bind(msg.file_public_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
}

/// All messages of a room, oldest first.
pub async fn list_messages(pool: &SqlitePool, room_id: RoomId) -> Result<Vec<MessageRow>, sqlx::Error> {
    sqlx::query_as::<_, MessageRow>(
        "SELECT id, room_id, user_id, username, content, type, file_public_id, created_at \
         FROM messages WHERE room_id = ? \
         ORDER BY created_at ASC, id ASC",
    )
    .bind(room_id)
    .fetch_all(pool)
    .await
}

/// Delete every message of a room. Returns the number of rows removed.
pub async fn delete_messages(pool: &SqlitePool, room_id: RoomId) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM messages WHERE room_id = ?")
        .bind(room_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
