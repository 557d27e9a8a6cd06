//! HTTP surface tests against the in-memory store: ingestion outcomes and
//! the dashboard read paths.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use hive_ingestor::anomaly::DeltaThresholds;
use hive_ingestor::memory::MemoryStore;
use hive_ingestor::model::OwnerRef;
use hive_ingestor::pipeline::{HistoryWindow, Pipeline};
use hive_ingestor::publish::Publisher;
use hive_ingestor::resolve::RouterTypeTable;
use hive_ingestor::rest;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

fn app(store: Arc<MemoryStore>) -> Router {
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        RouterTypeTable::default(),
        Arc::new(Publisher::new(64)),
        DeltaThresholds::default(),
        HistoryWindow::default(),
    ));
    rest::create_router(pipeline, store)
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed_owner(
        "107",
        OwnerRef {
            owner_id: "user-1".to_string(),
            hive_id: Some("hive-1".to_string()),
            apiary_id: None,
        },
    );
    store
}

fn ingest_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/ingest")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn reading_body() -> Value {
    json!({
        "deviceId": "BT107",
        "routerId": "107",
        "sensorId": "1013",
        "sensorData": { "temperature": 25.5, "humidity": 60.0 },
        "batteryLevel": 85,
        "signalStrength": -65
    })
}

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_ingest_stores_reading_and_reports_outcome() {
    let store = seeded_store();
    let app = app(store.clone());

    let resp = app.oneshot(ingest_request(reading_body())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["quality"], "excellent");
    assert!(body["data"]["readingId"].is_string());
    assert!(body["data"]["deviceRef"].is_string());
    assert_eq!(store.reading_count(), 1);
    assert_eq!(store.device_count(), 1);
}

#[tokio::test]
async fn test_ingest_rejects_invalid_payload() {
    let store = seeded_store();
    let app = app(store.clone());

    let mut body = reading_body();
    body["sensorData"] = json!({});
    let resp = app.oneshot(ingest_request(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = body_json(resp.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(store.reading_count(), 0);
}

#[tokio::test]
async fn test_ingest_rejects_out_of_range_temperature() {
    let app = app(seeded_store());

    let mut body = reading_body();
    body["sensorData"]["temperature"] = json!(150.0);
    let resp = app.oneshot(ingest_request(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_unresolvable_device_is_unprocessable() {
    // No owner seeded, so router 999 cannot be inferred.
    let store = Arc::new(MemoryStore::new());
    let app = app(store.clone());

    let mut body = reading_body();
    body["deviceId"] = json!("BT999");
    body["routerId"] = json!("999");
    let resp = app.oneshot(ingest_request(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(resp.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(store.reading_count(), 0);
}

#[tokio::test]
async fn test_readings_query_returns_stored_readings() {
    let store = seeded_store();
    let app = app(store.clone());

    let resp = app
        .clone()
        .oneshot(ingest_request(reading_body()))
        .await
        .unwrap();
    let ingest = body_json(resp.into_body()).await;
    let device_ref = ingest["data"]["deviceRef"].as_str().unwrap().to_string();

    let resp = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/readings?device_id={device_ref}&limit=10"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp.into_body()).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["values"]["temperature"], 25.5);
    assert_eq!(body["data"][0]["quality"], "excellent");
}

#[tokio::test]
async fn test_devices_lists_recently_seen() {
    let store = seeded_store();
    let app = app(store.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["total"], 0);

    app.clone()
        .oneshot(ingest_request(reading_body()))
        .await
        .unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["router_id"], "107");
    assert_eq!(body["data"][0]["owner_id"], "user-1");
}

#[tokio::test]
async fn test_ws_route_requires_upgrade() {
    // A plain GET without upgrade headers must not be treated as a
    // subscription; the upgrade extractor rejects it.
    let app = app(seeded_store());
    let resp = app
        .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}
