use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::db::models::RoomId;

use super::events::{ConnectionId, ServerEvent};

/// Maximum queued outbound events per connection (slow clients lose events
/// instead of growing memory without bound).
pub const MAX_OUTBOUND_QUEUE: usize = 256;

/// Outcome of handing an event to a connection's write loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; this event was dropped for this recipient only.
    Dropped,
    /// The write loop is gone. The connection is marked dead.
    Closed,
}

/// A live socket as seen by the relay. Transport-agnostic: the relay only
/// pushes [`ServerEvent`]s into the outbound queue.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    outbound: mpsc::Sender<ServerEvent>,
    alive: AtomicBool,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// Create a connection and the receiver its write loop drains.
    pub fn open() -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            outbound: tx,
            alive: AtomicBool::new(true),
            connected_at: Utc::now(),
        });
        (conn, rx)
    }

    /// Whether broadcasts should still be attempted.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Stop delivering to this connection.
    pub fn mark_closed(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Queue an event without waiting.
    pub fn send(&self, event: ServerEvent) -> Delivery {
        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => {
                self.mark_closed();
                Delivery::Closed
            }
        }
    }
}

/// Where a connection stands in the join lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnState {
    /// Connected, no join processed yet (or left since).
    #[default]
    Unjoined,
    Joined { room_id: RoomId, username: String },
}

impl ConnState {
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::Unjoined => None,
            Self::Joined { room_id, .. } => Some(*room_id),
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self, Self::Joined { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_queues_event() {
        let (conn, mut rx) = Connection::open();
        assert_eq!(conn.send(ServerEvent::ActiveUsers { count: 1 }), Delivery::Queued);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::ActiveUsers { count: 1 });
    }

    #[test]
    fn test_full_queue_drops_without_closing() {
        let (conn, _rx) = Connection::open();
        for _ in 0..MAX_OUTBOUND_QUEUE {
            assert_eq!(conn.send(ServerEvent::ActiveUsers { count: 1 }), Delivery::Queued);
        }
        assert_eq!(conn.send(ServerEvent::ActiveUsers { count: 2 }), Delivery::Dropped);
        assert!(conn.is_alive());
    }

    #[test]
    fn test_closed_receiver_marks_connection_dead() {
        let (conn, rx) = Connection::open();
        drop(rx);
        assert_eq!(conn.send(ServerEvent::ActiveUsers { count: 1 }), Delivery::Closed);
        assert!(!conn.is_alive());
    }

    #[test]
    fn test_connections_have_distinct_ids() {
        let (a, _ra) = Connection::open();
        let (b, _rb) = Connection::open();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_conn_state() {
        let state = ConnState::default();
        assert_eq!(state.room_id(), None);
        assert!(!state.is_joined());

        let joined = ConnState::Joined {
            room_id: 4,
            username: "astrid".into(),
        };
        assert_eq!(joined.room_id(), Some(4));
        assert!(joined.is_joined());
    }
}
