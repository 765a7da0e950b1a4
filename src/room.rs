use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message;

pub type ConnectionId = Uuid;

/// A live client session's outbound queue. Whatever is pushed here is
/// written to the socket by that connection's writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Connection {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

type Rooms = Arc<RwLock<HashMap<String, Vec<Connection>>>>;

/// Live connections grouped by room.
///
/// A room exists only while it has at least one connection: it is created by
/// the first [`join`](Self::join) and dropped by the [`leave`](Self::leave)
/// that empties it. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Rooms,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, room_id: &str, connection: Connection) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room_id.to_string()).or_default();
        members.push(connection);
        debug!("Room {room_id} now has {} connection(s)", members.len());
    }

    /// Removes a connection. Returns `false` if it was not registered in the room.
    pub async fn leave(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let Some(pos) = members.iter().position(|c| c.id == connection_id) else {
            return false;
        };

        members.remove(pos);
        if members.is_empty() {
            rooms.remove(room_id);
            debug!("Room {room_id} is empty, dropping it");
        }
        true
    }

    /// Queues `message` for every connection in the room, the sender included.
    pub async fn broadcast(&self, room_id: &str, message: &Message) -> usize {
        self.broadcast_except(room_id, message, None).await
    }

    /// Queues `message` for every connection in the room but `except`.
    /// Returns how many connections it was queued for. A closed connection is
    /// skipped without affecting delivery to the others.
    pub async fn broadcast_except(
        &self,
        room_id: &str,
        message: &Message,
        except: Option<ConnectionId>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for connection in members.iter().filter(|c| Some(c.id) != except) {
            if connection.sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(
                    "Dropping message for closed connection {} in room {}",
                    connection.id, room_id
                );
            }
        }
        delivered
    }

    pub async fn occupancy(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map_or(0, Vec::len)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (Connection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(tx), rx)
    }

    fn text(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<String> {
        rx.try_recv()
            .ok()
            .map(|m| m.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member_including_sender() {
        let registry = RoomRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = connection();
            registry.join("R", conn).await;
            receivers.push(rx);
        }

        let delivered = registry.broadcast("R", &Message::text("stroke")).await;

        assert_eq!(delivered, 3);
        for rx in &mut receivers {
            assert_eq!(text(rx).as_deref(), Some("stroke"));
        }
    }

    #[tokio::test]
    async fn test_broadcast_stays_in_room() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = connection();
        let (b, mut rx_b) = connection();
        registry.join("a", a).await;
        registry.join("b", b).await;

        registry.broadcast("a", &Message::text("hello a")).await;

        assert_eq!(text(&mut rx_a).as_deref(), Some("hello a"));
        assert_eq!(text(&mut rx_b), None);
        assert_eq!(registry.broadcast("nobody", &Message::text("x")).await, 0);
    }

    #[tokio::test]
    async fn test_left_connection_gets_nothing() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = connection();
        let (b, mut rx_b) = connection();
        let a_id = a.id();
        registry.join("R", a).await;
        registry.join("R", b).await;

        assert!(registry.leave("R", a_id).await);
        registry.broadcast("R", &Message::text("after")).await;

        assert_eq!(text(&mut rx_a), None);
        assert_eq!(text(&mut rx_b).as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_and_reaps_empty_rooms() {
        let registry = RoomRegistry::new();
        let (a, _rx) = connection();
        let a_id = a.id();
        registry.join("R", a).await;
        assert_eq!(registry.room_count().await, 1);

        assert!(registry.leave("R", a_id).await);
        assert!(!registry.leave("R", a_id).await);
        assert!(!registry.leave("elsewhere", a_id).await);
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.occupancy("R").await, 0);

        let (b, _rx_b) = connection();
        registry.join("R", b).await;
        assert_eq!(registry.occupancy("R").await, 1);
    }

    #[tokio::test]
    async fn test_closed_connection_does_not_stop_fan_out() {
        let registry = RoomRegistry::new();
        let (gone, rx_gone) = connection();
        let (alive, mut rx_alive) = connection();
        registry.join("R", gone).await;
        registry.join("R", alive).await;
        drop(rx_gone);

        let delivered = registry.broadcast("R", &Message::text("still here")).await;

        assert_eq!(delivered, 1);
        assert_eq!(text(&mut rx_alive).as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_one() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = connection();
        let (b, mut rx_b) = connection();
        let a_id = a.id();
        registry.join("R", a).await;
        registry.join("R", b).await;

        let delivered = registry
            .broadcast_except("R", &Message::text("cursor"), Some(a_id))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(text(&mut rx_a), None);
        assert_eq!(text(&mut rx_b).as_deref(), Some("cursor"));
    }

    #[tokio::test]
    async fn test_concurrent_join_and_leave() {
        let registry = RoomRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (conn, _rx) = connection();
                let id = conn.id();
                registry.join("R", conn).await;
                registry.broadcast("R", &Message::text("tick")).await;
                registry.leave("R", id).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(registry.room_count().await, 0);
    }
}
