//! Signaling core: rooms of connections and fan-out relay of opaque
//! WebRTC negotiation messages.

mod connection;
mod manager;
mod message;
mod room;

pub use connection::{ChannelSink, Connection, ConnectionId, SignalSink};
pub use manager::MeetingManager;
pub use message::SignalMessage;
pub use room::{BroadcastReport, Room};
