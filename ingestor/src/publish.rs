//! Owner-scoped fan-out of processed readings and alerts, plus a global
//! diagnostic channel for transport health and unmatched devices.
//!
//! Built on tokio broadcast channels so the publisher has no dependency on
//! any particular real-time transport. Delivery is at-most-once: a
//! disconnected or lagging subscriber receives nothing retroactively.

use crate::anomaly::ParameterTrend;
use crate::metrics::EVENTS_PUBLISHED_TOTAL;
use crate::model::{AlertKind, Anomaly, Quality, Severity, Values};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingEvent {
    pub owner_id: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: Values,
    pub quality: Quality,
    pub anomalies: Vec<Anomaly>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trends: Vec<ParameterTrend>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub owner_id: String,
    pub device_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    Reading(ReadingEvent),
    Alert(AlertEvent),
    #[serde(rename_all = "camelCase")]
    TransportStatus {
        connected: bool,
        transport_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UnmatchedDevice {
        router_id: String,
        sensor_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

pub struct Publisher {
    owners: RwLock<HashMap<String, broadcast::Sender<Event>>>,
    diagnostics: broadcast::Sender<Event>,
    capacity: usize,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (diagnostics, _) = broadcast::channel(capacity);
        Publisher {
            owners: RwLock::new(HashMap::new()),
            diagnostics,
            capacity,
        }
    }

    /// Join an owner's channel. The channel is created on first subscribe
    /// or first publish, whichever comes first, and retained for the
    /// process lifetime; the map is bounded by the number of distinct
    /// owners with registered routers.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<Event> {
        self.owner_sender(owner_id).subscribe()
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Event> {
        self.diagnostics.subscribe()
    }

    /// Fan out to the subscribers currently joined to this owner's channel.
    pub fn publish(&self, owner_id: &str, event: Event) {
        EVENTS_PUBLISHED_TOTAL.inc();
        let delivered = self.owner_sender(owner_id).send(event).unwrap_or(0);
        debug!(owner_id, delivered, "published owner event");
    }

    /// Broadcast a diagnostic to every connected subscriber, not scoped to
    /// any owner.
    pub fn publish_diagnostic(&self, event: Event) {
        EVENTS_PUBLISHED_TOTAL.inc();
        let delivered = self.diagnostics.send(event).unwrap_or(0);
        debug!(delivered, "published diagnostic event");
    }

    fn owner_sender(&self, owner_id: &str) -> broadcast::Sender<Event> {
        if let Some(sender) = self.owners.read().expect("publisher lock").get(owner_id) {
            return sender.clone();
        }
        let mut owners = self.owners.write().expect("publisher lock");
        owners
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading_event(owner_id: &str) -> Event {
        Event::Reading(ReadingEvent {
            owner_id: owner_id.to_string(),
            device_id: "BT107".to_string(),
            timestamp: Utc::now(),
            values: Values::from([("temperature".to_string(), 25.0)]),
            quality: Quality::Excellent,
            anomalies: Vec::new(),
            trends: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        let publisher = Publisher::new(16);
        let mut alice = publisher.subscribe("alice");
        let mut bob = publisher.subscribe("bob");

        publisher.publish("alice", reading_event("alice"));

        let received = alice.recv().await.unwrap();
        assert!(matches!(received, Event::Reading(e) if e.owner_id == "alice"));
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let publisher = Publisher::new(16);
        // No subscriber connected: nothing queued, nothing replayed.
        publisher.publish("alice", reading_event("alice"));
        let mut alice = publisher.subscribe("alice");
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_diagnostics_are_global() {
        let publisher = Publisher::new(16);
        let mut first = publisher.subscribe_diagnostics();
        let mut second = publisher.subscribe_diagnostics();

        publisher.publish_diagnostic(Event::TransportStatus {
            connected: false,
            transport_id: "serial:/dev/ttyUSB0".to_string(),
            timestamp: Utc::now(),
        });

        for rx in [&mut first, &mut second] {
            let event = rx.recv().await.unwrap();
            assert!(matches!(event, Event::TransportStatus { connected: false, .. }));
        }
    }

    #[test]
    fn test_event_wire_names() {
        let json = serde_json::to_value(reading_event("alice")).unwrap();
        assert_eq!(json["type"], "reading");
        assert_eq!(json["ownerId"], "alice");

        let alert = Event::Alert(AlertEvent {
            owner_id: "alice".to_string(),
            device_id: "BT107".to_string(),
            kind: AlertKind::HighTemperature,
            message: "High temperature: 36°C".to_string(),
            severity: Severity::Critical,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(alert).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["kind"], "high_temperature");
        assert_eq!(json["severity"], "critical");

        let status = Event::TransportStatus {
            connected: true,
            transport_id: "tcp:127.0.0.1:7000".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["type"], "transport-status");
        assert_eq!(json["transportId"], "tcp:127.0.0.1:7000");
    }
}
