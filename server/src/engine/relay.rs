use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::db::models::{NewMessage, RoomId};
use crate::db::queries::{messages, presence, rooms};

use super::connection::{ConnState, Connection, Delivery};
use super::events::{ClientEvent, ConnectionId, MessageDraft, ServerEvent, UserRef};
use super::purge::RoomPurger;
use super::registry::{RoomRegistry, Vacancy};
use super::validation;

/// Why an inbound event was not applied.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("connection has not joined a room")]
    NotJoined,
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
    #[error("invalid event: {0}")]
    Invalid(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Room-scoped relay. Transport adapters feed it one connection's frames in
/// order; it keeps presence and history in the store and fans events out to
/// every connection registered in the room.
///
/// All processing for a room (including store I/O and the purge) runs under
/// that room's gate, so joins, leaves and messages of one room are applied
/// one at a time while different rooms proceed concurrently.
pub struct ChatRelay {
    db: SqlitePool,
    registry: RoomRegistry,
    gates: DashMap<RoomId, Arc<Mutex<()>>>,
    purger: RoomPurger,
    max_message_length: usize,
}

impl ChatRelay {
    pub fn new(db: SqlitePool, purger: RoomPurger, max_message_length: usize) -> Self {
        Self {
            db,
            registry: RoomRegistry::new(),
            gates: DashMap::new(),
            purger,
            max_message_length,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn purger(&self) -> &RoomPurger {
        &self.purger
    }

    /// Handle one text frame. Malformed frames and rejected events are logged
    /// and dropped; the connection stays open either way.
    pub async fn handle_frame(&self, conn: &Arc<Connection>, state: &mut ConnState, text: &str) {
        let event: ClientEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "ignoring malformed frame");
                return;
            }
        };

        let name = event.name();
        let claimed_room = event.room_id();
        match self.handle_event(conn, state, event).await {
            Ok(()) => {}
            Err(e @ RelayError::Store(_)) => {
                error!(conn_id = %conn.id, event = name, claimed_room, error = %e, "event failed");
            }
            Err(e) => {
                warn!(conn_id = %conn.id, event = name, claimed_room, error = %e, "event rejected");
            }
        }
    }

    pub async fn handle_event(
        &self,
        conn: &Arc<Connection>,
        state: &mut ConnState,
        event: ClientEvent,
    ) -> Result<(), RelayError> {
        match event {
            ClientEvent::Join { room_id, user } => self.join(conn, state, room_id, user).await,
            ClientEvent::Leave { room_id, user } => {
                let ConnState::Joined { room_id: joined, username } = &*state else {
                    return Err(RelayError::NotJoined);
                };
                if *joined != room_id || *username != user.username {
                    debug!(
                        conn_id = %conn.id,
                        joined_room = *joined,
                        claimed_room = room_id,
                        "leave payload differs from joined room; using joined room"
                    );
                }
                self.detach(conn, state).await;
                Ok(())
            }
            ClientEvent::Message { room_id, message } => {
                self.send_message(conn, state, room_id, message).await
            }
            ClientEvent::Typing { user, is_typing, .. } => self.typing(conn, state, user, is_typing).await,
        }
    }

    /// Socket closed. Same as an explicit leave; no-op if never joined.
    pub async fn disconnect(&self, conn: &Arc<Connection>, state: &mut ConnState) {
        conn.mark_closed();
        self.detach(conn, state).await;
    }

    async fn join(
        &self,
        conn: &Arc<Connection>,
        state: &mut ConnState,
        room_id: RoomId,
        user: UserRef,
    ) -> Result<(), RelayError> {
        validation::validate_username(&user.username).map_err(RelayError::Invalid)?;
        let username = user.username.trim().to_string();

        // Rooms are never deleted, so the lookup can run before taking the gate.
        // A rejected join must leave the current room untouched.
        if rooms::get_room(&self.db, room_id).await?.is_none() {
            return Err(RelayError::UnknownRoom(room_id));
        }

        if let ConnState::Joined {
            room_id: current,
            username: current_name,
        } = &*state
            && (*current != room_id || *current_name != username)
        {
            self.detach(conn, state).await;
        }

        let gate = self.gate(room_id);
        let _guard = gate.lock().await;

        let added = self.registry.register(room_id, conn.clone());
        *state = ConnState::Joined {
            room_id,
            username: username.clone(),
        };

        presence::upsert_presence(&self.db, room_id, user.id, &username).await?;

        info!(room_id, %username, conn_id = %conn.id, rejoin = !added, "user joined room");
        self.broadcast(
            room_id,
            &ServerEvent::Join {
                room_id,
                user: UserRef::named(&username),
            },
            None,
        );
        self.broadcast_active_count(room_id).await?;
        Ok(())
    }

    /// Drop the connection from its room: presence, leave broadcast,
    /// deregistration and, for the last connection out, the purge. Store
    /// failures are logged so the in-memory transition always happens.
    async fn detach(&self, conn: &Arc<Connection>, state: &mut ConnState) {
        let ConnState::Joined { room_id, username } = std::mem::take(state) else {
            return;
        };

        let gate = self.gate(room_id);
        let _guard = gate.lock().await;

        if let Err(e) = presence::remove_presence(&self.db, room_id, &username).await {
            error!(room_id, %username, error = %e, "failed to remove presence record");
        }

        self.broadcast(
            room_id,
            &ServerEvent::Leave {
                room_id,
                user: UserRef::named(&username),
            },
            None,
        );

        match self.registry.deregister(room_id, conn.id) {
            Vacancy::Emptied => {
                info!(room_id, %username, "last connection left room, purging");
                match self.purger.purge(room_id).await {
                    Ok(report) if report.attachments_failed => {
                        warn!(
                            room_id,
                            messages_deleted = report.messages_deleted,
                            attachments = report.attachments_requested,
                            "room purged, attachments left behind"
                        );
                    }
                    Ok(report) => {
                        debug!(
                            room_id,
                            messages_deleted = report.messages_deleted,
                            attachments = report.attachments_requested,
                            "room purge complete"
                        );
                    }
                    Err(e) => error!(room_id, error = %e, "room purge failed"),
                }
                // Drop the gate unless another task already holds a clone of it.
                self.gates
                    .remove_if(&room_id, |_, g| Arc::ptr_eq(g, &gate) && Arc::strong_count(g) == 2);
            }
            Vacancy::Occupied => {
                info!(room_id, %username, conn_id = %conn.id, "user left room");
                if let Err(e) = self.broadcast_active_count(room_id).await {
                    error!(room_id, error = %e, "failed to refresh active user count");
                }
            }
            Vacancy::NotRegistered => {
                warn!(room_id, conn_id = %conn.id, "detaching connection that was not registered");
            }
        }
    }

    async fn send_message(
        &self,
        conn: &Arc<Connection>,
        state: &ConnState,
        claimed_room: RoomId,
        draft: MessageDraft,
    ) -> Result<(), RelayError> {
        let ConnState::Joined { room_id, username } = state else {
            return Err(RelayError::NotJoined);
        };
        let room_id = *room_id;
        if claimed_room != room_id {
            debug!(conn_id = %conn.id, room_id, claimed_room, "message for another room; using joined room");
        }
        validation::validate_message(&draft.content, self.max_message_length)
            .map_err(RelayError::Invalid)?;

        let author = match draft.username.trim() {
            "" => username.as_str(),
            name => name,
        };

        let gate = self.gate(room_id);
        let _guard = gate.lock().await;

        let row = messages::insert_message(
            &self.db,
            &NewMessage {
                room_id,
                user_id: draft.user_id,
                username: author,
                content: &draft.content,
                kind: draft.kind,
                file_public_id: draft.file_public_id.as_deref().filter(|id| !id.is_empty()),
            },
        )
        .await?;

        if let Err(e) = presence::touch_presence(&self.db, room_id, username).await {
            warn!(room_id, %username, error = %e, "failed to refresh presence");
        }

        debug!(room_id, message_id = row.id, kind = ?row.kind, "message stored");
        self.broadcast(room_id, &ServerEvent::Message { room_id, message: row }, None);
        Ok(())
    }

    async fn typing(
        &self,
        conn: &Arc<Connection>,
        state: &ConnState,
        user: UserRef,
        is_typing: bool,
    ) -> Result<(), RelayError> {
        let ConnState::Joined { room_id, .. } = state else {
            return Err(RelayError::NotJoined);
        };

        let gate = self.gate(*room_id);
        let _guard = gate.lock().await;

        self.broadcast(
            *room_id,
            &ServerEvent::Typing {
                room_id: *room_id,
                user,
                is_typing,
            },
            Some(conn.id),
        );
        Ok(())
    }

    /// Fire-and-forget fan-out. Returns how many connections took the event.
    fn broadcast(&self, room_id: RoomId, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for conn in self.registry.connections_of(room_id) {
            if Some(conn.id) == exclude || !conn.is_alive() {
                continue;
            }
            match conn.send(event.clone()) {
                Delivery::Queued => delivered += 1,
                Delivery::Dropped => {
                    warn!(room_id, conn_id = %conn.id, "outbound queue full, dropping event");
                }
                Delivery::Closed => {
                    debug!(room_id, conn_id = %conn.id, "connection closed, skipping from now on");
                }
            }
        }
        delivered
    }

    async fn broadcast_active_count(&self, room_id: RoomId) -> Result<(), sqlx::Error> {
        let count = presence::count_active(&self.db, room_id).await?;
        self.broadcast(room_id, &ServerEvent::ActiveUsers { count }, None);
        Ok(())
    }

    fn gate(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        self.gates.entry(room_id).or_default().clone()
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.len()
    }
}
