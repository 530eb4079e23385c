use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::SignalingError;
use crate::signaling::{Connection, MeetingManager, SignalMessage};
use crate::websocket::SessionIdentity;

/// Standalone relay listener built directly on tokio-tungstenite.
pub struct WebSocketServer {
    meetings: Arc<MeetingManager>,
    relay: RelayConfig,
}

impl WebSocketServer {
    pub fn new(meetings: Arc<MeetingManager>, relay: RelayConfig) -> Self {
        Self { meetings, relay }
    }

    /// Accepts connections until the meeting manager shuts down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.meetings.shutdown_signal();
        if let Ok(addr) = listener.local_addr() {
            info!("Standalone relay listening on ws://{}/ws/{{client_id}}", addr);
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            server.handle_connection(stream, addr).await;
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown.changed() => {
                    info!("Standalone relay stopped accepting connections");
                    break;
                }
            }
        }
    }

    pub async fn handle_connection(self: Arc<Self>, raw_stream: TcpStream, addr: SocketAddr) {
        info!("New WebSocket connection from: {}", addr);

        let mut identity: Option<SessionIdentity> = None;
        let handshake = tokio_tungstenite::accept_hdr_async(
            raw_stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                match SessionIdentity::from_request_target(&request.uri().to_string()) {
                    Ok(resolved) => {
                        identity = Some(resolved);
                        Ok(response)
                    }
                    Err(e) => {
                        let mut rejection = ErrorResponse::new(Some(e.to_string()));
                        *rejection.status_mut() = StatusCode::BAD_REQUEST;
                        Err(rejection)
                    }
                }
            },
        )
        .await;

        let ws_stream = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                error!("Error during WebSocket handshake with {}: {}", addr, e);
                return;
            }
        };
        let Some(identity) = identity else {
            return;
        };

        let (connection, mut rx) = Connection::channel(
            identity.client_id.clone(),
            self.relay.outbound_buffer,
            self.relay.send_timeout(),
        );
        let connection_id = connection.id();

        if let Err(e) = self.meetings.join(&identity.room_id, connection.clone()).await {
            error!("Client {} could not join room {}: {}", identity.client_id, identity.room_id, e);
            return;
        }
        drop(connection);

        let (ws_sink, ws_stream) = ws_stream.split();

        // Forward relayed messages from the room to the socket
        let mut send_task = tokio::spawn(async move {
            let mut ws_sink = ws_sink;

            while let Some(message) = rx.recv().await {
                let text = match message.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Dropping outbound message for {}: {}", connection_id, e);
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(text)).await {
                    error!("Error sending WebSocket message: {}", e);
                    break;
                }
            }

            if let Err(e) = ws_sink.close().await {
                debug!("Error closing WebSocket connection: {}", e);
            }
        });

        let meetings = self.meetings.clone();
        let room_id = identity.room_id.clone();
        let mut receive_task = tokio::spawn(async move {
            let mut ws_stream = ws_stream;

            while let Some(frame) = ws_stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let message = match SignalMessage::from_text(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                warn!("Dropped frame from {}: {}", connection_id, e);
                                continue;
                            }
                        };
                        match meetings.broadcast(&room_id, &message, connection_id).await {
                            Ok(_) => {}
                            Err(SignalingError::RoomNotFound(_)) => {
                                debug!("Room {} is gone, nothing to relay", room_id);
                            }
                            Err(e) => warn!("Relay from {} failed: {}", connection_id, e),
                        }
                    }
                    Ok(Message::Binary(bin)) => {
                        warn!("Ignoring binary frame of {} bytes from {}", bin.len(), connection_id);
                    }
                    Ok(Message::Close(reason)) => {
                        info!("Client closed connection {}: {:?}", connection_id, reason);
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong are answered by tungstenite itself
                    }
                    Err(e) => {
                        error!("Error receiving WebSocket message: {}", e);
                        break;
                    }
                }
            }
        });

        let mut shutdown = self.meetings.shutdown_signal();
        tokio::select! {
            _ = &mut send_task => {
                info!("Send task completed for connection {}", connection_id);
            }
            _ = &mut receive_task => {
                info!("Receive task completed for connection {}", connection_id);
            }
            _ = shutdown.changed() => {
                info!("Shutting down connection {}", connection_id);
            }
        }
        receive_task.abort();

        self.meetings.leave(&identity.room_id, connection_id).await;
        info!("Connection {} closed", connection_id);
    }

    pub fn meetings(&self) -> Arc<MeetingManager> {
        self.meetings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_server() -> (Arc<WebSocketServer>, SocketAddr) {
        let _ = tracing_subscriber::fmt::try_init();
        let settings = Settings::new_for_test().expect("Failed to load test config");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Arc::new(WebSocketServer::new(Arc::new(MeetingManager::new()), settings.relay));
        tokio::spawn(server.clone().serve(listener));
        (server, addr)
    }

    async fn connect(addr: SocketAddr, target: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}{}", addr, target)).await.unwrap();
        ws
    }

    async fn wait_for_members(server: &WebSocketServer, room: &str, count: usize) {
        for _ in 0..40 {
            let members = server.meetings().members(room).await.map(|m| m.len()).unwrap_or(0);
            if members == count {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!("room {} never reached {} members", room, count);
    }

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("read error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn assert_silent(client: &mut Client) {
        let result = timeout(POLL_INTERVAL * 4, client.next()).await;
        assert!(result.is_err(), "unexpected frame: {:?}", result);
    }

    #[tokio::test]
    async fn test_offer_answer_relay() {
        let (server, addr) = start_server().await;

        let mut alice = connect(addr, "/ws/alice?room=r1").await;
        let mut bob = connect(addr, "/ws/bob?room=r1").await;
        wait_for_members(&server, "r1", 2).await;

        let offer = json!({"type": "offer", "sdp": "..."});
        alice.send(Message::Text(offer.to_string())).await.unwrap();
        assert_eq!(next_json(&mut bob).await, offer);

        let answer = json!({"type": "answer", "sdp": "..."});
        bob.send(Message::Text(answer.to_string())).await.unwrap();
        assert_eq!(next_json(&mut alice).await, answer);

        alice.close(None).await.unwrap();
        wait_for_members(&server, "r1", 1).await;

        bob.send(Message::Text(json!({"type": "bye"}).to_string())).await.unwrap();
        assert_silent(&mut bob).await;
    }

    #[tokio::test]
    async fn test_invalid_frame_keeps_connection() {
        let (server, addr) = start_server().await;

        let mut alice = connect(addr, "/ws/alice?room=r2").await;
        let mut bob = connect(addr, "/ws/bob?room=r2").await;
        wait_for_members(&server, "r2", 2).await;

        alice.send(Message::Text("not json".to_string())).await.unwrap();
        alice.send(Message::Text("[1, 2]".to_string())).await.unwrap();
        let candidate = json!({"type": "candidate", "candidate": "a=1"});
        alice.send(Message::Text(candidate.to_string())).await.unwrap();

        assert_eq!(next_json(&mut bob).await, candidate);
        assert_eq!(server.meetings().members("r2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_per_sender_order() {
        let (server, addr) = start_server().await;

        let mut alice = connect(addr, "/ws/alice?room=r3").await;
        let mut bob = connect(addr, "/ws/bob?room=r3").await;
        wait_for_members(&server, "r3", 2).await;

        for seq in 0..25 {
            alice.send(Message::Text(json!({"type": "candidate", "seq": seq}).to_string())).await.unwrap();
        }
        for seq in 0..25 {
            assert_eq!(next_json(&mut bob).await["seq"], json!(seq));
        }
    }

    #[tokio::test]
    async fn test_client_id_is_default_room() {
        let (server, addr) = start_server().await;

        let _alice = connect(addr, "/ws/alice").await;
        wait_for_members(&server, "alice", 1).await;
        assert_eq!(server.meetings().room_ids().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_bad_path_is_rejected() {
        let (server, addr) = start_server().await;

        let result = connect_async(format!("ws://{}/chat", addr)).await;
        assert!(result.is_err());
        assert_eq!(server.meetings().room_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let (server, addr) = start_server().await;

        let mut alice = connect(addr, "/ws/alice?room=r4").await;
        wait_for_members(&server, "r4", 1).await;

        server.meetings().shutdown().await;

        let ended = timeout(Duration::from_secs(2), async {
            while let Some(Ok(frame)) = alice.next().await {
                if let Message::Close(_) = frame {
                    break;
                }
            }
        })
        .await;
        assert!(ended.is_ok(), "client was not disconnected on shutdown");
    }
}
