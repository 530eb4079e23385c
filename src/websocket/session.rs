use std::sync::Arc;
use std::time::Instant;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{SignalingError, WebSocketError};
use crate::signaling::{Connection, MeetingManager, SignalMessage, SignalSink};
use crate::websocket::{JoinQuery, SessionIdentity};
use crate::AppState;

/// A message relayed into a session's mailbox.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Relay(pub SignalMessage);

/// Delivers into an actor mailbox without waiting; a full or closed
/// mailbox is a delivery failure.
pub struct ActorSink {
    recipient: Recipient<Relay>,
}

impl ActorSink {
    pub fn new(recipient: Recipient<Relay>) -> Self {
        Self { recipient }
    }
}

#[async_trait]
impl SignalSink for ActorSink {
    async fn deliver(&self, message: SignalMessage) -> Result<(), WebSocketError> {
        self.recipient
            .try_send(Relay(message))
            .map_err(|e| WebSocketError::SendError(e.to_string()))
    }
}

/// WebSocket upgrade for `GET /ws/{client_id}[?room={room_id}]`.
pub async fn websocket_route(
    req: HttpRequest,
    stream: web::Payload,
    client_id: web::Path<String>,
    query: web::Query<JoinQuery>,
    state: web::Data<AppState>,
) -> std::result::Result<HttpResponse, actix_web::Error> {
    let peer_addr = req.peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if state.meetings.is_shutting_down() {
        return Err(crate::AppError::from(SignalingError::ShuttingDown).into());
    }

    let identity = SessionIdentity::resolve(client_id.into_inner(), query.into_inner().room)
        .map_err(crate::AppError::from)?;
    info!(
        "New WebSocket connection request from {} (client {}, room {})",
        peer_addr, identity.client_id, identity.room_id
    );

    ws::start(
        WebSocketSession::new(state.meetings.clone(), identity, state.config.relay.clone()),
        &req,
        stream,
    )
}

/// One client on the actix transport. Inbound frames are relayed one at a
/// time with `ctx.wait`, which keeps a sender's messages in order.
pub struct WebSocketSession {
    meetings: Arc<MeetingManager>,
    identity: SessionIdentity,
    relay: RelayConfig,
    connection: Option<Connection>,
    last_heartbeat: Instant,
}

impl WebSocketSession {
    pub fn new(meetings: Arc<MeetingManager>, identity: SessionIdentity, relay: RelayConfig) -> Self {
        Self {
            meetings,
            identity,
            relay,
            connection: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn join(&mut self, ctx: &mut <Self as Actor>::Context) {
        let connection = Connection::new(
            self.identity.client_id.clone(),
            Arc::new(ActorSink::new(ctx.address().recipient())),
        );
        self.connection = Some(connection.clone());

        let meetings = self.meetings.clone();
        let room_id = self.identity.room_id.clone();
        ctx.wait(
            async move { meetings.join(&room_id, connection).await }
                .into_actor(self)
                .map(|result, act, ctx| {
                    if let Err(e) = result {
                        error!("Client {} could not join room {}: {}", act.identity.client_id, act.identity.room_id, e);
                        act.connection = None;
                        ctx.stop();
                    }
                }),
        );
    }

    fn relay_text(&mut self, text: &str, ctx: &mut <Self as Actor>::Context) {
        let Some(sender) = self.connection.as_ref().map(|c| c.id()) else {
            return;
        };

        let message = match SignalMessage::from_text(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropped frame from {}: {}", sender, e);
                return;
            }
        };

        let meetings = self.meetings.clone();
        let room_id = self.identity.room_id.clone();
        ctx.wait(
            async move { meetings.broadcast(&room_id, &message, sender).await }
                .into_actor(self)
                .map(move |result, act, _ctx| match result {
                    Ok(_) => {}
                    Err(SignalingError::RoomNotFound(_)) => {
                        debug!("Room {} is gone, nothing to relay", act.identity.room_id);
                    }
                    Err(e) => warn!("Relay from {} failed: {}", sender, e),
                }),
        );
    }

    /// Pings the client and stops the session if it has gone quiet.
    fn start_heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        let client_timeout = self.relay.client_timeout();
        ctx.run_interval(self.relay.heartbeat_interval(), move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!("Heartbeat timeout for client {}", act.identity.client_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn watch_shutdown(&self, ctx: &mut <Self as Actor>::Context) {
        let mut shutdown = self.meetings.shutdown_signal();
        ctx.spawn(
            async move {
                let _ = shutdown.changed().await;
            }
            .into_actor(self)
            .map(|_, act, ctx| {
                info!("Closing session for client {} on shutdown", act.identity.client_id);
                ctx.close(Some(ws::CloseCode::Away.into()));
                ctx.stop();
            }),
        );
    }
}

impl Actor for WebSocketSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection established for client {}", self.identity.client_id);
        ctx.set_mailbox_capacity(self.relay.outbound_buffer);
        self.start_heartbeat(ctx);
        self.watch_shutdown(ctx);
        self.join(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection closed for client {}", self.identity.client_id);
        if let Some(connection) = self.connection.take() {
            let meetings = self.meetings.clone();
            let room_id = self.identity.room_id.clone();
            actix::spawn(async move {
                meetings.leave(&room_id, connection.id()).await;
            });
        }
    }
}

impl Handler<Relay> for WebSocketSession {
    type Result = ();

    fn handle(&mut self, msg: Relay, ctx: &mut Self::Context) {
        match msg.0.to_text() {
            Ok(text) => ctx.text(text),
            Err(e) => error!("Failed to serialize relayed message: {}", e),
        }
    }
}

impl StreamHandler<std::result::Result<ws::Message, ws::ProtocolError>> for WebSocketSession {
    fn handle(&mut self, msg: std::result::Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.relay_text(&text, ctx);
            }
            Ok(ws::Message::Binary(bin)) => {
                warn!("Ignoring binary frame of {} bytes from client {}", bin.len(), self.identity.client_id);
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed by client {}: {:?}", self.identity.client_id, reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                error!("Error handling WebSocket message from client {}: {}", self.identity.client_id, e);
                ctx.stop();
            }
        }
    }
}
