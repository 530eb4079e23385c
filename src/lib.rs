pub mod config;
pub mod error;
pub mod signaling;
pub mod websocket;

use std::sync::Arc;
use actix_web::{web, HttpResponse};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use signaling::{Connection, MeetingManager, Room, SignalMessage};

/// Health check endpoint handler
/// Returns server status, a timestamp and live room/connection counts
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "rooms": state.meetings.room_count().await,
        "connections": state.meetings.connection_count().await,
    }))
}

pub async fn hello() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "message": "Hello World" }))
}

/// Registers every HTTP and WebSocket route of the relay.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/hello", web::get().to(hello))
        .route("/ws/{client_id}", web::get().to(websocket::websocket_route));
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub meetings: Arc<MeetingManager>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        Self {
            config: Arc::new(config),
            meetings: Arc::new(MeetingManager::new()),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.meetings.shutdown().await;
        Ok(())
    }
}
