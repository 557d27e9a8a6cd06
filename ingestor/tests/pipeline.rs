//! End-to-end pipeline scenarios over the in-memory store: decoded line in,
//! stored reading and published events out.

use hive_ingestor::anomaly::DeltaThresholds;
use hive_ingestor::decode;
use hive_ingestor::memory::MemoryStore;
use hive_ingestor::model::{AlertKind, OwnerRef, Quality, Severity};
use hive_ingestor::pipeline::{HistoryWindow, Outcome, Pipeline};
use hive_ingestor::publish::{Event, Publisher};
use hive_ingestor::resolve::RouterTypeTable;
use std::sync::Arc;

fn owner(owner_id: &str) -> OwnerRef {
    OwnerRef {
        owner_id: owner_id.to_string(),
        hive_id: Some("hive-1".to_string()),
        apiary_id: None,
    }
}

fn pipeline(store: Arc<MemoryStore>) -> Pipeline<MemoryStore> {
    Pipeline::new(
        store,
        RouterTypeTable::default(),
        Arc::new(Publisher::new(64)),
        DeltaThresholds::default(),
        HistoryWindow::default(),
    )
}

#[tokio::test]
async fn test_delimited_line_stored_with_quality() {
    let store = Arc::new(MemoryStore::new());
    store.seed_owner("107", owner("user-1"));
    let pipeline = pipeline(store.clone());

    let raw = decode::decode_line("BT107:34.5,65.0,12.0:85:-65").unwrap();
    let outcome = pipeline.process(raw).await.unwrap();

    let Outcome::Stored(reading) = outcome else {
        panic!("expected stored reading");
    };
    assert_eq!(reading.values.get("temperature"), Some(&34.5));
    assert_eq!(reading.values.get("humidity"), Some(&65.0));
    assert_eq!(reading.values.get("weight"), Some(&12.0));
    assert_eq!(reading.battery_level, Some(85));
    assert_eq!(reading.signal_strength, Some(-65));
    // battery 85: no penalty, signal -65: -10
    assert_eq!(reading.quality, Quality::Excellent);
    assert!(reading.anomalies.is_empty());
    assert_eq!(store.reading_count(), 1);
}

#[tokio::test]
async fn test_key_tagged_line_creates_device_once() {
    let store = Arc::new(MemoryStore::new());
    store.seed_owner("108", owner("user-2"));
    let pipeline = pipeline(store.clone());

    let raw = decode::decode_line("RID:108; SID:1002; CO: 40.0").unwrap();
    pipeline.process(raw.clone()).await.unwrap();
    assert_eq!(store.device_count(), 1);

    pipeline.process(raw).await.unwrap();
    assert_eq!(store.device_count(), 1);
    assert_eq!(store.reading_count(), 2);
}

#[tokio::test]
async fn test_unregistered_router_publishes_diagnostic_only() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store.clone());
    let mut diagnostics = pipeline.publisher().subscribe_diagnostics();

    let raw = decode::decode_line("BT999:20.0,50.0,10.0:90:-60").unwrap();
    let outcome = pipeline.process(raw).await.unwrap();

    assert!(matches!(outcome, Outcome::Unmatched));
    assert_eq!(store.reading_count(), 0);
    assert_eq!(store.device_count(), 0);

    let Ok(Event::UnmatchedDevice { router_id, .. }) = diagnostics.try_recv() else {
        panic!("expected unmatched-device diagnostic");
    };
    assert_eq!(router_id, "999");
    assert!(diagnostics.try_recv().is_err());
}

#[tokio::test]
async fn test_sudden_temperature_change_flagged() {
    let store = Arc::new(MemoryStore::new());
    store.seed_owner("107", owner("user-1"));
    let pipeline = pipeline(store.clone());

    let first = decode::decode_line("BT107:20.0,50.0,10.0:90:-60").unwrap();
    pipeline.process(first).await.unwrap();

    let second = decode::decode_line("BT107:31.0,50.0,10.0:90:-60").unwrap();
    let Outcome::Stored(reading) = pipeline.process(second).await.unwrap() else {
        panic!("expected stored reading");
    };

    assert_eq!(reading.anomalies.len(), 1);
    let anomaly = &reading.anomalies[0];
    assert_eq!(anomaly.parameter, "temperature");
    assert_eq!(anomaly.previous_value, 20.0);
    assert_eq!(anomaly.current_value, 31.0);
    assert_eq!(anomaly.severity, Severity::Medium);
}

#[tokio::test]
async fn test_events_scoped_to_owner() {
    let store = Arc::new(MemoryStore::new());
    store.seed_owner("107", owner("user-1"));
    let pipeline = pipeline(store.clone());

    let mut owner_events = pipeline.publisher().subscribe("user-1");
    let mut other_events = pipeline.publisher().subscribe("user-2");

    // temperature 36.0 also trips the high-temperature alert
    let raw = decode::decode_line("BT107:36.0,50.0,10.0:90:-60").unwrap();
    pipeline.process(raw).await.unwrap();

    let Ok(Event::Reading(reading)) = owner_events.try_recv() else {
        panic!("expected reading event");
    };
    assert_eq!(reading.owner_id, "user-1");
    assert_eq!(reading.values.get("temperature"), Some(&36.0));

    let Ok(Event::Alert(alert)) = owner_events.try_recv() else {
        panic!("expected alert event");
    };
    assert_eq!(alert.kind, AlertKind::HighTemperature);
    assert_eq!(alert.severity, Severity::Critical);

    assert!(other_events.try_recv().is_err());
}

#[tokio::test]
async fn test_weight_anomaly_raises_info_alert() {
    let store = Arc::new(MemoryStore::new());
    store.seed_owner("109", owner("user-1"));
    let pipeline = pipeline(store.clone());
    let mut events = pipeline.publisher().subscribe("user-1");

    let first = decode::decode_line("RID:109; SID:1050; WG: 40.0").unwrap();
    pipeline.process(first).await.unwrap();
    let second = decode::decode_line("RID:109; SID:1050; WG: 32.0").unwrap();
    pipeline.process(second).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Alert(alert) = event {
            kinds.push((alert.kind, alert.severity));
        }
    }
    assert!(kinds.contains(&(AlertKind::WeightAnomaly, Severity::Info)));
}
