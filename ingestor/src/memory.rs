//! In-memory storage backend.
//!
//! Used when no `DATABASE_URL` is configured (HTTP-only trials, demos) and
//! by the test suite. Owner inference is seeded from the static
//! router→owner table in the configuration.

use crate::errors::Result;
use crate::model::{Device, DeviceStatus, OwnerRef, Reading};
use crate::storage::{DeviceRegistry, OwnerLookup, ReadingRepository};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<Vec<Device>>,
    readings: RwLock<Vec<Reading>>,
    owners: RwLock<HashMap<String, OwnerRef>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn seed_owner(&self, router_id: &str, owner: OwnerRef) {
        self.owners
            .write()
            .expect("owners lock")
            .insert(router_id.to_string(), owner);
    }

    pub fn seed_device(&self, device: Device) {
        self.devices.write().expect("devices lock").push(device);
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().expect("devices lock").len()
    }

    pub fn reading_count(&self) -> usize {
        self.readings.read().expect("readings lock").len()
    }
}

impl DeviceRegistry for MemoryStore {
    async fn find_device(&self, router_id: &str, sensor_id: Option<&str>) -> Result<Option<Device>> {
        let devices = self.devices.read().expect("devices lock");
        let found = devices.iter().find(|d| {
            d.router_id == router_id
                && match sensor_id {
                    Some(sensor) => d.sensor_id.as_deref() == Some(sensor),
                    None => true,
                }
        });
        Ok(found.cloned())
    }

    async fn insert_device_if_absent(&self, device: Device) -> Result<(Device, bool)> {
        let mut devices = self.devices.write().expect("devices lock");
        if let Some(existing) = devices.iter().find(|d| d.router_id == device.router_id) {
            return Ok((existing.clone(), false));
        }
        devices.push(device.clone());
        Ok((device, true))
    }

    async fn update_device_liveness(
        &self,
        id: Uuid,
        last_seen_at: DateTime<Utc>,
        battery_level: Option<u8>,
        status: DeviceStatus,
    ) -> Result<()> {
        let mut devices = self.devices.write().expect("devices lock");
        if let Some(device) = devices.iter_mut().find(|d| d.id == id) {
            device.last_seen_at = Some(last_seen_at);
            device.battery_level = battery_level;
            device.status = status;
        }
        Ok(())
    }

    async fn active_devices(&self, since: DateTime<Utc>) -> Result<Vec<Device>> {
        let devices = self.devices.read().expect("devices lock");
        Ok(devices
            .iter()
            .filter(|d| d.last_seen_at.is_some_and(|seen| seen >= since))
            .cloned()
            .collect())
    }
}

impl OwnerLookup for MemoryStore {
    async fn find_owner_for_router(&self, router_id: &str) -> Result<Option<OwnerRef>> {
        Ok(self
            .owners
            .read()
            .expect("owners lock")
            .get(router_id)
            .cloned())
    }
}

impl ReadingRepository for MemoryStore {
    async fn append_reading(&self, reading: &Reading) -> Result<()> {
        self.readings
            .write()
            .expect("readings lock")
            .push(reading.clone());
        Ok(())
    }

    async fn latest_reading(&self, device_ref: Uuid) -> Result<Option<Reading>> {
        let readings = self.readings.read().expect("readings lock");
        let mut latest: Option<&Reading> = None;
        for reading in readings.iter().filter(|r| r.device_ref == device_ref) {
            // Later insertion wins ties, matching append order.
            if latest.is_none_or(|best| reading.timestamp >= best.timestamp) {
                latest = Some(reading);
            }
        }
        Ok(latest.cloned())
    }

    async fn recent_readings(
        &self,
        device_ref: Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let readings = self.readings.read().expect("readings lock");
        let mut matching: Vec<Reading> = readings
            .iter()
            .filter(|r| r.device_ref == device_ref && r.timestamp >= since)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.timestamp);
        if matching.len() > limit {
            matching.drain(..matching.len() - limit);
        }
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Quality, Values};

    fn device(router_id: &str) -> Device {
        Device {
            id: Uuid::new_v4(),
            router_id: router_id.to_string(),
            sensor_id: None,
            device_id: format!("BT{router_id}"),
            owner_id: "user-1".to_string(),
            hive_id: None,
            apiary_id: None,
            sensor_kinds: vec!["temperature".to_string()],
            battery_level: Some(100),
            last_seen_at: None,
            status: DeviceStatus::Active,
        }
    }

    fn reading(device_ref: Uuid, minutes_ago: i64) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            device_ref,
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            values: Values::from([("temperature".to_string(), 25.0)]),
            battery_level: Some(85),
            signal_strength: Some(-65),
            quality: Quality::Excellent,
            anomalies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_is_idempotent_per_router() {
        let store = MemoryStore::new();
        let (first, created) = store.insert_device_if_absent(device("107")).await.unwrap();
        assert!(created);
        let (second, created) = store.insert_device_if_absent(device("107")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(store.device_count(), 1);
    }

    #[tokio::test]
    async fn test_latest_reading_picks_newest() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.append_reading(&reading(id, 20)).await.unwrap();
        store.append_reading(&reading(id, 5)).await.unwrap();
        store.append_reading(&reading(id, 10)).await.unwrap();

        let latest = store.latest_reading(id).await.unwrap().unwrap();
        assert!(latest.timestamp > Utc::now() - chrono::Duration::minutes(6));
    }

    #[tokio::test]
    async fn test_recent_readings_window_and_order() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        for minutes in [50, 40, 30, 20, 10] {
            store.append_reading(&reading(id, minutes)).await.unwrap();
        }

        let since = Utc::now() - chrono::Duration::minutes(45);
        let recent = store.recent_readings(id, since, 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        // Bounded to the most recent points, so the 40-minute-old reading
        // falls out.
        assert!(recent[0].timestamp > Utc::now() - chrono::Duration::minutes(35));
    }
}
