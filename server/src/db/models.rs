use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric room identifier, assigned by the store.
pub type RoomId = i64;

/// A room ("hall"), identified by its shared password.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RoomRow {
    pub id: RoomId,
    #[serde(skip_serializing)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// What a message's `content` holds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// URL of an externally hosted image.
    Image,
    /// URL of an externally hosted file.
    File,
}

impl MessageKind {
    /// Image and file messages point at externally hosted attachments.
    pub fn is_attachment(self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: i64,
    pub room_id: RoomId,
    pub user_id: Option<i64>,
    pub username: String,
    pub content: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: MessageKind,
    pub file_public_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a message.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub room_id: RoomId,
    pub user_id: Option<i64>,
    pub username: &'a str,
    pub content: &'a str,
    pub kind: MessageKind,
    pub file_public_id: Option<&'a str>,
}

/// A presence record: `username` is currently active in `room_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUserRow {
    pub id: i64,
    pub room_id: RoomId,
    pub user_id: Option<i64>,
    pub username: String,
    pub last_seen: DateTime<Utc>,
}
