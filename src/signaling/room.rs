use std::collections::HashMap;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::signaling::{Connection, ConnectionId, SignalMessage};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct Room {
    id: String,
    members: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `false` if the connection was already a member.
    pub async fn add(&self, connection: Connection) -> bool {
        let mut members = self.members.write().await;
        if members.contains_key(&connection.id()) {
            return false;
        }
        members.insert(connection.id(), connection);
        true
    }

    /// Returns `false` if the connection was not a member.
    pub async fn remove(&self, connection_id: &ConnectionId) -> bool {
        self.members.write().await.remove(connection_id).is_some()
    }

    pub async fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.read().await.contains_key(connection_id)
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    pub async fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.read().await.keys().copied().collect()
    }

    /// Delivers `message` to every member except `sender`.
    ///
    /// The member list is copied before any send, so joins and leaves are
    /// never blocked behind a slow recipient. A recipient that fails is
    /// logged and skipped.
    pub async fn broadcast(&self, message: &SignalMessage, sender: ConnectionId) -> BroadcastReport {
        let recipients: Vec<Connection> = self
            .members
            .read()
            .await
            .values()
            .filter(|connection| connection.id() != sender)
            .cloned()
            .collect();

        let results = join_all(
            recipients
                .iter()
                .map(|connection| connection.send(message.clone())),
        )
        .await;

        let mut report = BroadcastReport::default();
        for result in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Broadcast in room {} skipped a recipient: {}", self.id, e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Relayed message from {} in room {} ({} delivered, {} failed)",
            sender, self.id, report.delivered, report.failed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebSocketError;
    use crate::signaling::SignalSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_millis(50);

    struct BrokenSink;

    #[async_trait]
    impl SignalSink for BrokenSink {
        async fn deliver(&self, _message: SignalMessage) -> Result<(), WebSocketError> {
            Err(WebSocketError::ConnectionError("socket reset".to_string()))
        }
    }

    fn message(kind: &str) -> SignalMessage {
        SignalMessage::try_from(json!({"type": kind})).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_remove_are_idempotent() {
        let room = Room::new("r1");
        let (connection, _rx) = Connection::channel("alice", 4, TIMEOUT);

        assert!(room.add(connection.clone()).await);
        assert!(!room.add(connection.clone()).await);
        assert_eq!(room.len().await, 1);

        assert!(room.remove(&connection.id()).await);
        assert!(!room.remove(&connection.id()).await);
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        for size in 1..=5 {
            let room = Room::new("r1");
            let mut receivers: Vec<(ConnectionId, mpsc::Receiver<SignalMessage>)> = Vec::new();
            for i in 0..size {
                let (connection, rx) = Connection::channel(format!("client-{}", i), 4, TIMEOUT);
                receivers.push((connection.id(), rx));
                room.add(connection).await;
            }

            let sender = receivers[0].0;
            let report = room.broadcast(&message("offer"), sender).await;
            assert_eq!(report, BroadcastReport { delivered: size - 1, failed: 0 });

            for (id, rx) in receivers.iter_mut() {
                if *id == sender {
                    assert!(rx.try_recv().is_err(), "sender received its own message");
                } else {
                    assert_eq!(rx.try_recv().ok(), Some(message("offer")));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_failing_recipient_is_isolated() {
        let room = Room::new("r1");
        let (sender, _sender_rx) = Connection::channel("alice", 4, TIMEOUT);
        let (healthy, mut healthy_rx) = Connection::channel("bob", 4, TIMEOUT);
        let broken = Connection::new("carol", Arc::new(BrokenSink));
        let (closed, closed_rx) = Connection::channel("dave", 4, TIMEOUT);
        drop(closed_rx);

        room.add(sender.clone()).await;
        room.add(broken).await;
        room.add(healthy).await;
        room.add(closed).await;

        let report = room.broadcast(&message("offer"), sender.id()).await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 2 });
        assert_eq!(healthy_rx.recv().await, Some(message("offer")));
        assert_eq!(room.len().await, 4);
    }

    #[tokio::test]
    async fn test_stalled_recipient_does_not_block_membership() {
        let room = Arc::new(Room::new("r1"));
        let (sender, _sender_rx) = Connection::channel("alice", 4, TIMEOUT);
        let (stalled, _stalled_rx) = Connection::channel("bob", 1, Duration::from_millis(300));
        room.add(sender.clone()).await;
        room.add(stalled).await;

        // Fill the stalled queue so the next delivery waits for the timeout.
        room.broadcast(&message("first"), sender.id()).await;

        let broadcasting = {
            let room = room.clone();
            let sender_id = sender.id();
            tokio::spawn(async move { room.broadcast(&message("second"), sender_id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (late, _late_rx) = Connection::channel("carol", 4, TIMEOUT);
        let joined = tokio::time::timeout(Duration::from_millis(100), room.add(late)).await;
        assert_eq!(joined.ok(), Some(true));

        let report = broadcasting.await.unwrap();
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_per_sender_order() {
        let room = Room::new("r1");
        let (sender, _sender_rx) = Connection::channel("alice", 4, TIMEOUT);
        let (receiver, mut rx) = Connection::channel("bob", 64, TIMEOUT);
        room.add(sender.clone()).await;
        room.add(receiver).await;

        for i in 0..20 {
            let msg = SignalMessage::try_from(json!({"type": "candidate", "seq": i})).unwrap();
            room.broadcast(&msg, sender.id()).await;
        }

        for i in 0..20 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.get("seq"), Some(&json!(i)));
        }
    }
}
