use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Canonical parameter name → measured value.
///
/// A key that is missing means "not reported", which is distinct from a
/// reported zero.
pub type Values = BTreeMap<String, f64>;

/// Reading trustworthiness bucket derived from battery, signal and age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::Poor => "poor",
        }
    }

    pub fn parse(s: &str) -> Option<Quality> {
        match s {
            "excellent" => Some(Quality::Excellent),
            "good" => Some(Quality::Good),
            "fair" => Some(Quality::Fair),
            "poor" => Some(Quality::Poor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    LowBattery,
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::LowBattery => "low_battery",
            DeviceStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<DeviceStatus> {
        match s {
            "active" => Some(DeviceStatus::Active),
            "low_battery" => Some(DeviceStatus::LowBattery),
            "error" => Some(DeviceStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Medium,
    High,
    Critical,
}

/// A registered hardware endpoint: one radio router, optionally one sensor
/// on it. Created lazily on first contact, never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    /// External hardware id, unique per deployment.
    pub router_id: String,
    pub sensor_id: Option<String>,
    /// Human-readable alias, e.g. "BT107".
    pub device_id: String,
    pub owner_id: String,
    pub hive_id: Option<String>,
    pub apiary_id: Option<String>,
    /// Canonical parameter names this device reports.
    pub sensor_kinds: Vec<String>,
    pub battery_level: Option<u8>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub status: DeviceStatus,
}

/// Transport-level decode output. Ephemeral, never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub device_id: String,
    pub router_id: String,
    pub sensor_id: Option<String>,
    pub values: Values,
    pub battery_level: Option<u8>,
    pub signal_strength: Option<i32>,
    /// Timestamp supplied by the coordinator, if any. Absent for line
    /// formats that do not carry one; the store falls back to write time.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Persisted record. Immutable once written, append-only per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub device_ref: Uuid,
    pub timestamp: DateTime<Utc>,
    pub values: Values,
    pub battery_level: Option<u8>,
    pub signal_strength: Option<i32>,
    pub quality: Quality,
    pub anomalies: Vec<Anomaly>,
}

/// A sudden per-parameter delta against the previous reading. Attached to
/// the Reading at write time, never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub parameter: String,
    pub previous_value: f64,
    pub current_value: f64,
    pub delta: f64,
    pub threshold_exceeded: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighTemperature,
    LowTemperature,
    HumidityOutOfRange,
    LowBattery,
    WeightAnomaly,
}

/// Owner inferred for an unseen router, resolved through the hive hardware
/// descriptor by the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_id: String,
    pub hive_id: Option<String>,
    pub apiary_id: Option<String>,
}
