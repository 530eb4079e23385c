//! WebSocket transports for the signaling relay.
//!
//! Both transports follow the same lifecycle: resolve the session identity,
//! join the room once, relay each inbound text frame in order, and leave
//! once on disconnect.

mod identity;
mod server;
mod session;

pub use identity::{JoinQuery, SessionIdentity};
pub use server::WebSocketServer;
pub use session::{websocket_route, ActorSink, Relay, WebSocketSession};
