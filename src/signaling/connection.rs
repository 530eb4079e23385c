use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use uuid::Uuid;

use crate::error::{SignalingError, WebSocketError};
use crate::signaling::SignalMessage;

pub type ConnectionId = Uuid;

/// Outbound half of a client's transport.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, message: SignalMessage) -> Result<(), WebSocketError>;
}

/// Bounded queue drained by a transport writer task.
pub struct ChannelSink {
    tx: mpsc::Sender<SignalMessage>,
    send_timeout: Duration,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SignalMessage>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }
}

#[async_trait]
impl SignalSink for ChannelSink {
    async fn deliver(&self, message: SignalMessage) -> Result<(), WebSocketError> {
        self.tx
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => WebSocketError::SendError(format!(
                    "outbound queue full for {:?}",
                    self.send_timeout
                )),
                SendTimeoutError::Closed(_) => {
                    WebSocketError::SendError("outbound channel closed".to_string())
                }
            })
    }
}

/// One client's membership handle. Clones share the same identity and sink.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    client_id: String,
    sink: Arc<dyn SignalSink>,
}

impl Connection {
    pub fn new(client_id: impl Into<String>, sink: Arc<dyn SignalSink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            sink,
        }
    }

    /// Builds a connection backed by a bounded channel and returns the
    /// receiver the transport drains into its socket.
    pub fn channel(
        client_id: impl Into<String>,
        capacity: usize,
        send_timeout: Duration,
    ) -> (Self, mpsc::Receiver<SignalMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Arc::new(ChannelSink::new(tx, send_timeout));
        (Self::new(client_id, sink), rx)
    }

    pub async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        self.sink
            .deliver(message)
            .await
            .map_err(|e| SignalingError::RecipientDeliveryFailure {
                connection_id: self.id,
                reason: e.to_string(),
            })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .finish()
    }
}
