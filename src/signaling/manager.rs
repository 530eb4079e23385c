use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::error::SignalingError;
use crate::signaling::{BroadcastReport, Connection, ConnectionId, Room, SignalMessage};

#[derive(Debug, Default)]
struct Registry {
    rooms: HashMap<String, Arc<Room>>,
    /// Room each live connection belongs to; a connection has at most one.
    homes: HashMap<ConnectionId, String>,
}

/// Registry of live rooms.
///
/// Every membership change goes through the registry write lock, so a room
/// is unlinked in the same critical section that empties it and a
/// concurrent `join` always lands in a room that is still reachable.
/// Lock order is registry, then room.
#[derive(Debug)]
pub struct MeetingManager {
    registry: Arc<RwLock<Registry>>,
    shutdown: watch::Sender<bool>,
}

impl Default for MeetingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingManager {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            shutdown,
        }
    }

    /// Adds `connection` to `room_id`, creating the room on first use.
    /// Returns `false` when the connection is already a member. A
    /// connection that belongs to a different room is rejected.
    pub async fn join(&self, room_id: &str, connection: Connection) -> Result<bool, SignalingError> {
        if room_id.trim().is_empty() {
            return Err(SignalingError::InvalidIdentifier(room_id.to_string()));
        }

        let mut registry = self.registry.write().await;
        if self.is_shutting_down() {
            return Err(SignalingError::ShuttingDown);
        }

        let connection_id = connection.id();
        match registry.homes.get(&connection_id) {
            Some(home) if home == room_id => {
                debug!("Connection {} already in room {}", connection_id, room_id);
                return Ok(false);
            }
            Some(home) => {
                return Err(SignalingError::AlreadyInRoom {
                    connection_id,
                    room_id: home.clone(),
                });
            }
            None => {}
        }

        let room = registry
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!("Created room {}", room_id);
                Arc::new(Room::new(room_id))
            })
            .clone();

        let client_id = connection.client_id().to_string();
        let added = room.add(connection).await;
        if added {
            registry.homes.insert(connection_id, room_id.to_string());
            let members = room.len().await;
            info!(
                "Client {} joined room {} (connection {}, {} members)",
                client_id, room_id, connection_id, members
            );
        }
        Ok(added)
    }

    /// Removes a member; unknown rooms and non-members are ignored.
    /// A room left empty is dropped from the registry.
    pub async fn leave(&self, room_id: &str, connection_id: ConnectionId) -> bool {
        let mut registry = self.registry.write().await;
        let Some(room) = registry.rooms.get(room_id).cloned() else {
            debug!("Leave for unknown room {} ignored", room_id);
            return false;
        };

        let removed = room.remove(&connection_id).await;
        if removed {
            registry.homes.remove(&connection_id);
            info!("Connection {} left room {}", connection_id, room_id);
        }

        if room.is_empty().await {
            registry.rooms.remove(room_id);
            info!("Removed empty room {}", room_id);
        }
        removed
    }

    pub async fn lookup(&self, room_id: &str) -> Result<Arc<Room>, SignalingError> {
        self.registry
            .read()
            .await
            .rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))
    }

    /// Relays `message` to everyone in `room_id` except `sender`.
    pub async fn broadcast(
        &self,
        room_id: &str,
        message: &SignalMessage,
        sender: ConnectionId,
    ) -> Result<BroadcastReport, SignalingError> {
        let room = self.lookup(room_id).await?;
        Ok(room.broadcast(message, sender).await)
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.homes.len()
    }

    pub async fn room_ids(&self) -> Vec<String> {
        self.registry.read().await.rooms.keys().cloned().collect()
    }

    pub async fn members(&self, room_id: &str) -> Result<Vec<ConnectionId>, SignalingError> {
        Ok(self.lookup(room_id).await?.member_ids().await)
    }

    /// The room `connection_id` currently belongs to, if any.
    pub async fn room_of(&self, connection_id: &ConnectionId) -> Option<String> {
        self.registry.read().await.homes.get(connection_id).cloned()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops admitting joins, wakes every transport loop and drops all
    /// rooms. Returns the number of memberships released.
    pub async fn shutdown(&self) -> usize {
        let mut registry = self.registry.write().await;
        self.shutdown.send_replace(true);

        let released = registry.homes.len();
        registry.rooms.clear();
        registry.homes.clear();

        info!("Meeting manager shut down, released {} connections", released);
        released
    }
}
