//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::api::server::AppState;
use crate::protocol::RoomSnapshot;
use crate::rooms::RegistryStatsSnapshot;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Relay status
#[derive(serde::Serialize)]
pub struct RelayStatus {
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub room_count: usize,
    pub session_count: usize,
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub malformed_frames: u64,
    pub joins: u64,
    pub leaves: u64,
    pub routing: RegistryStatsSnapshot,
}

/// Get relay status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<RelayStatus>> {
    let status = RelayStatus {
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        room_count: state.registry.room_count(),
        session_count: state.registry.session_count(),
        connections_accepted: state.counters.accepted(),
        connections_active: state.counters.active(),
        malformed_frames: state.counters.malformed(),
        joins: state.registry.presence().join_count(),
        leaves: state.registry.presence().leave_count(),
        routing: state.registry.stats(),
    };

    Json(ApiResponse::ok(status))
}

/// Get all occupied rooms
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<RoomSnapshot>>> {
    Json(ApiResponse::ok(state.registry.rooms()))
}

/// Get one room by code
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> (StatusCode, Json<ApiResponse<RoomSnapshot>>) {
    match state.registry.members(&code) {
        Some(members) => (
            StatusCode::OK,
            Json(ApiResponse::ok(RoomSnapshot {
                room_code: code,
                members,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Room {} not found", code))),
        ),
    }
}
