//! HTTP surface: structured ingestion, read-back queries, and the
//! per-owner WebSocket feed.

use crate::decode;
use crate::model::{Device, Reading};
use crate::pipeline::{Outcome, Pipeline};
use crate::publish::Publisher;
use crate::storage::Storage;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct AppState<S> {
    pub pipeline: Arc<Pipeline<S>>,
    pub store: Arc<S>,
}

// Manual impl: derive(Clone) would demand S: Clone, but only the Arcs
// are cloned.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState {
            pipeline: self.pipeline.clone(),
            store: self.store.clone(),
        }
    }
}

pub fn create_router<S: Storage>(pipeline: Arc<Pipeline<S>>, store: Arc<S>) -> Router {
    let state = AppState { pipeline, store };

    Router::new()
        .route("/api/ingest", post(ingest_reading))
        .route("/api/v1/readings", get(get_readings))
        .route("/api/v1/devices", get(get_devices))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Structured ingestion for gateways that speak JSON directly. Shares the
/// full pipeline with the transport path, but reports the outcome to the
/// caller instead of logging it away.
async fn ingest_reading<S: Storage>(
    State(state): State<AppState<S>>,
    Json(body): Json<decode::StructuredReading>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = decode::decode_structured(body)
        .map_err(|e| ApiError::bad_request(format!("invalid reading: {e}")))?;

    match state.pipeline.process(raw).await {
        Ok(Outcome::Stored(reading)) => Ok(Json(json!({
            "success": true,
            "message": "Reading stored",
            "data": {
                "readingId": reading.id,
                "deviceRef": reading.device_ref,
                "quality": reading.quality,
                "receivedAt": reading.timestamp,
            },
        }))),
        Ok(Outcome::Unmatched) => Err(ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "device not registered and no owner could be inferred".to_string(),
        }),
        Err(e) => {
            error!(error = %e, "ingest failed");
            Err(ApiError::internal())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReadingsQuery {
    device_id: Uuid,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ReadingsResponse {
    data: Vec<Reading>,
    total: usize,
}

async fn get_readings<S: Storage>(
    State(state): State<AppState<S>>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<ReadingsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let since = Utc::now() - Duration::days(30);
    let data = state
        .store
        .recent_readings(params.device_id, since, limit)
        .await
        .map_err(|e| {
            error!(error = %e, "readings query failed");
            ApiError::internal()
        })?;
    let total = data.len();
    Ok(Json(ReadingsResponse { data, total }))
}

#[derive(Debug, Serialize)]
struct DevicesResponse {
    data: Vec<Device>,
    total: usize,
}

/// Devices that have reported within the last 30 minutes.
async fn get_devices<S: Storage>(
    State(state): State<AppState<S>>,
) -> Result<Json<DevicesResponse>, ApiError> {
    let since = Utc::now() - Duration::minutes(30);
    let data = state.store.active_devices(since).await.map_err(|e| {
        error!(error = %e, "devices query failed");
        ApiError::internal()
    })?;
    let total = data.len();
    Ok(Json(DevicesResponse { data, total }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    /// Owner channel to join; absent means the global diagnostic stream.
    owner: Option<String>,
}

async fn ws_upgrade<S: Storage>(
    State(state): State<AppState<S>>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let publisher = state.pipeline.publisher().clone();
    ws.on_upgrade(move |socket| serve_events(socket, publisher, params.owner))
}

/// Push the subscribed event stream over the socket until either side goes
/// away. Slow consumers that lag the broadcast buffer lose the overwritten
/// events and keep going.
async fn serve_events(mut socket: WebSocket, publisher: Arc<Publisher>, owner_id: Option<String>) {
    let mut events = match &owner_id {
        Some(owner) => publisher.subscribe(owner),
        None => publisher.subscribe_diagnostics(),
    };
    info!(?owner_id, "websocket subscriber connected");

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(?owner_id, missed, "websocket subscriber lagging, events skipped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "event serialization failed");
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            debug!(?owner_id, "websocket subscriber disconnected");
            break;
        }
    }
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> ApiError {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }

    fn internal() -> ApiError {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}
