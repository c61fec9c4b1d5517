use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{MessageKind, MessageRow, RoomId};

/// Unique identifier for a live connection (one per socket, not per user).
pub type ConnectionId = Uuid;

/// A user as named in join/leave/typing frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub username: String,
}

impl UserRef {
    /// A user known only by name, as announced to the room.
    pub fn named(username: &str) -> Self {
        Self {
            id: None,
            username: username.to_string(),
        }
    }
}

/// Message body of an inbound `message` frame, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default)]
    pub user_id: Option<i64>,
    pub username: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_public_id: Option<String>,
}

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Join {
        room_id: RoomId,
        user: UserRef,
    },
    Leave {
        room_id: RoomId,
        user: UserRef,
    },
    Message {
        room_id: RoomId,
        message: MessageDraft,
    },
    Typing {
        room_id: RoomId,
        user: UserRef,
        is_typing: bool,
    },
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
        }
    }

    /// Room the client claims the event is for.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::Join { room_id, .. }
            | Self::Leave { room_id, .. }
            | Self::Message { room_id, .. }
            | Self::Typing { room_id, .. } => *room_id,
        }
    }
}

/// A frame sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Someone joined the room (sent to everyone, the joiner included).
    Join { room_id: RoomId, user: UserRef },
    /// Someone left the room or their socket closed.
    Leave { room_id: RoomId, user: UserRef },
    /// A persisted message, with its store-assigned id and timestamp.
    Message { room_id: RoomId, message: MessageRow },
    /// Current number of presence records in the room.
    ActiveUsers { count: i64 },
    /// Typing indicator, relayed to everyone except the typist.
    Typing {
        room_id: RoomId,
        user: UserRef,
        is_typing: bool,
    },
}
