//! Admin HTTP server for the relay

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::error::NetworkError;
use crate::network::server::{RelayServer, ServerCounters};
use crate::rooms::RoomRegistry;

/// Shared application state
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub counters: Arc<ServerCounters>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<RoomRegistry>, counters: Arc<ServerCounters>) -> Self {
        Self {
            registry,
            counters,
            started_at: Utc::now(),
        }
    }

    pub fn for_server(server: &RelayServer) -> Self {
        Self::new(server.registry(), server.counters())
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/rooms", get(handlers::get_rooms))
        .route("/api/rooms/:code", get(handlers::get_room))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until `shutdown` turns true
pub async fn serve_api(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NetworkError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Admin API listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await
        .map_err(|e| NetworkError::Runtime(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::protocol::SessionId;

    fn state_with_room() -> Arc<AppState> {
        let registry = Arc::new(RoomRegistry::default());
        let id = SessionId::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.connect(id, tx);
        registry.join(id, "ABC", "Ana").unwrap();
        Arc::new(AppState::new(registry, Arc::new(ServerCounters::default())))
    }

    async fn get_json(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let (status, json) = get_json(state_with_room(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["room_count"], 1);
        assert_eq!(json["data"]["session_count"], 1);
        assert_eq!(json["data"]["joins"], 1);
        assert_eq!(json["data"]["leaves"], 0);
    }

    #[tokio::test]
    async fn test_rooms_lists_members() {
        let (_, json) = get_json(state_with_room(), "/api/rooms").await;
        assert_eq!(json["data"][0]["room_code"], "ABC");
        assert_eq!(json["data"][0]["members"][0], "Ana");
    }

    #[tokio::test]
    async fn test_unknown_room_is_not_found() {
        let (status, json) = get_json(state_with_room(), "/api/rooms/XYZ").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);

        let (status, json) = get_json(state_with_room(), "/api/rooms/ABC").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["members"][0], "Ana");
    }
}
