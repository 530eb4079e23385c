use serde::Deserialize;
use url::Url;

use crate::error::SignalingError;

/// Optional query on the upgrade request: `/ws/{client_id}?room={room_id}`.
#[derive(Debug, Default, Deserialize)]
pub struct JoinQuery {
    pub room: Option<String>,
}

/// Who is connecting and which room they relay into.
///
/// Without an explicit room the client id doubles as the room id, which
/// keeps old clients that only know `/ws/{client_id}` working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub client_id: String,
    pub room_id: String,
}

impl SessionIdentity {
    pub fn resolve(client_id: String, room: Option<String>) -> Result<Self, SignalingError> {
        if client_id.trim().is_empty() {
            return Err(SignalingError::InvalidIdentifier("client id is empty".to_string()));
        }

        let room_id = match room {
            Some(room) if room.trim().is_empty() => {
                return Err(SignalingError::InvalidIdentifier("room id is empty".to_string()));
            }
            Some(room) => room,
            None => client_id.clone(),
        };

        Ok(Self { client_id, room_id })
    }

    /// Parses a request target such as `/ws/alice?room=standup`. Any path
    /// prefix before `ws` is allowed so the relay can sit behind a mount point.
    pub fn from_request_target(target: &str) -> Result<Self, SignalingError> {
        let url = Url::parse("ws://relay.local")
            .and_then(|base| base.join(target))
            .map_err(|e| SignalingError::InvalidIdentifier(format!("bad request target: {}", e)))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.collect())
            .unwrap_or_default();

        let client_id = match segments.as_slice() {
            [.., "ws", client_id] => urlencoding::decode(client_id)
                .map_err(|e| SignalingError::InvalidIdentifier(format!("client id is not UTF-8: {}", e)))?
                .into_owned(),
            _ => {
                return Err(SignalingError::InvalidIdentifier(format!(
                    "expected /ws/{{client_id}}, got {}",
                    url.path()
                )))
            }
        };

        let room = url
            .query_pairs()
            .find(|(key, _)| key == "room")
            .map(|(_, value)| value.into_owned());

        Self::resolve(client_id, room)
    }
}
