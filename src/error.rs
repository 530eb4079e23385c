use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Signaling error: {0}")]
    SignalingError(#[from] SignalingError),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] WebSocketError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = self.to_string();
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": message
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::SignalingError(e) => match e {
                SignalingError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
                SignalingError::RoomNotFound(_) => StatusCode::NOT_FOUND,
                SignalingError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                SignalingError::AlreadyInRoom { .. } => StatusCode::CONFLICT,
                SignalingError::RecipientDeliveryFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::WebSocketError(WebSocketError::InvalidFormat(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failures raised by the room registry.
///
/// None of these cross from one connection's session into another's:
/// `RoomNotFound` is treated by transports as "nothing to relay" and
/// `RecipientDeliveryFailure` is swallowed inside a broadcast.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Delivery to connection {connection_id} failed: {reason}")]
    RecipientDeliveryFailure {
        connection_id: uuid::Uuid,
        reason: String,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Connection {connection_id} already belongs to room {room_id}")]
    AlreadyInRoom {
        connection_id: uuid::Uuid,
        room_id: String,
    },

    #[error("Meeting manager is shutting down")]
    ShuttingDown,
}

#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Message sending failed: {0}")]
    SendError(String),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}
