use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::attachments::{AttachmentRef, AttachmentStore};
use crate::db::models::{MessageRow, RoomId};
use crate::db::queries::messages;

/// What a purge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub messages_deleted: u64,
    pub attachments_requested: usize,
    pub attachments_failed: bool,
}

/// Erases a room's history once its last connection is gone. The room row
/// itself survives, so the password keeps resolving to the same id.
pub struct RoomPurger {
    db: SqlitePool,
    attachments: Arc<dyn AttachmentStore>,
    completed: AtomicU64,
}

impl RoomPurger {
    pub fn new(db: SqlitePool, attachments: Arc<dyn AttachmentStore>) -> Self {
        Self {
            db,
            attachments,
            completed: AtomicU64::new(0),
        }
    }

    /// Delete the room's attachments (best effort) and then all its messages.
    pub async fn purge(&self, room_id: RoomId) -> Result<PurgeReport, sqlx::Error> {
        let refs = match messages::list_messages(&self.db, room_id).await {
            Ok(rows) => attachment_refs(&rows),
            Err(e) => {
                error!(room_id, error = %e, "failed to list messages for purge, deleting rows anyway");
                Vec::new()
            }
        };

        let mut attachments_failed = false;
        if !refs.is_empty()
            && let Err(e) = self.attachments.delete_batch(&refs).await
        {
            warn!(room_id, count = refs.len(), error = %e, "failed to delete room attachments");
            attachments_failed = true;
        }

        let messages_deleted = messages::delete_messages(&self.db, room_id).await?;
        self.completed.fetch_add(1, Ordering::Relaxed);

        info!(room_id, messages_deleted, attachments = refs.len(), "room purged");
        Ok(PurgeReport {
            messages_deleted,
            attachments_requested: refs.len(),
            attachments_failed,
        })
    }

    /// Number of purges that reached message deletion since startup.
    pub fn purges_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Attachments referenced by image/file messages that carry a public id.
fn attachment_refs(rows: &[MessageRow]) -> Vec<AttachmentRef> {
    rows.iter()
        .filter(|m| m.kind.is_attachment())
        .filter_map(|m| {
            m.file_public_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .map(|id| AttachmentRef {
                    public_id: id.to_string(),
                    kind: m.kind,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::testing::RecordingStore;
    use crate::db::models::{MessageKind, NewMessage};
    use crate::db::pool::{create_pool, run_migrations};
    use crate::db::queries::rooms;

    async fn setup_db() -> (SqlitePool, RoomId) {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let room = rooms::get_or_create_room(&pool, "open-sesame").await.unwrap();
        (pool, room.id)
    }

    async fn post(pool: &SqlitePool, room_id: RoomId, kind: MessageKind, public_id: Option<&str>) {
        messages::insert_message(
            pool,
            &NewMessage {
                room_id,
                user_id: None,
                username: "astrid",
                content: "content",
                kind,
                file_public_id: public_id,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_purge_deletes_messages_and_attachments() {
        let (pool, room_id) = setup_db().await;
        post(&pool, room_id, MessageKind::Text, None).await;
        post(&pool, room_id, MessageKind::Image, Some("hall/cat")).await;
        post(&pool, room_id, MessageKind::File, Some("hall/report")).await;
        post(&pool, room_id, MessageKind::Image, None).await;
        post(&pool, room_id, MessageKind::Text, Some("ignored-for-text")).await;

        let store = Arc::new(RecordingStore::default());
        let purger = RoomPurger::new(pool.clone(), store.clone());
        let report = purger.purge(room_id).await.unwrap();

        assert_eq!(report.messages_deleted, 5);
        assert_eq!(report.attachments_requested, 2);
        assert!(!report.attachments_failed);
        assert_eq!(
            store.batches(),
            vec![vec![
                AttachmentRef {
                    public_id: "hall/cat".into(),
                    kind: MessageKind::Image
                },
                AttachmentRef {
                    public_id: "hall/report".into(),
                    kind: MessageKind::File
                },
            ]]
        );
        assert!(messages::list_messages(&pool, room_id).await.unwrap().is_empty());
        assert_eq!(purger.purges_completed(), 1);
    }

    #[tokio::test]
    async fn test_attachment_failure_does_not_block_deletion() {
        let (pool, room_id) = setup_db().await;
        post(&pool, room_id, MessageKind::Image, Some("hall/cat")).await;

        let store = Arc::new(RecordingStore::failing());
        let purger = RoomPurger::new(pool.clone(), store.clone());
        let report = purger.purge(room_id).await.unwrap();

        assert!(report.attachments_failed);
        assert_eq!(report.messages_deleted, 1);
        assert_eq!(store.batches().len(), 1);
        assert!(messages::list_messages(&pool, room_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_only_room_skips_attachment_store() {
        let (pool, room_id) = setup_db().await;
        post(&pool, room_id, MessageKind::Text, None).await;

        let store = Arc::new(RecordingStore::default());
        let purger = RoomPurger::new(pool.clone(), store.clone());
        purger.purge(room_id).await.unwrap();

        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_room_survives_purge() {
        let (pool, room_id) = setup_db().await;
        post(&pool, room_id, MessageKind::Text, None).await;

        let purger = RoomPurger::new(pool.clone(), Arc::new(RecordingStore::default()));
        purger.purge(room_id).await.unwrap();

        let again = rooms::get_or_create_room(&pool, "open-sesame").await.unwrap();
        assert_eq!(again.id, room_id);
    }
}
