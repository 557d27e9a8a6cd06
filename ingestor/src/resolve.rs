//! Device resolution: map `(router_id, sensor_id)` from a decoded reading
//! onto a registered device, creating one on first contact when the router
//! is configured on a hive.

use crate::errors::Result;
use crate::model::{Device, DeviceStatus, RawReading};
use crate::storage::{DeviceRegistry, OwnerLookup};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Battery assumed for a device synthesized before its first battery report.
const DEFAULT_BATTERY: u8 = 100;

/// Battery level at or below which a device is marked `low_battery`.
const LOW_BATTERY_CUTOFF: u8 = 20;

/// What a known router type reports and where it sits on the radio bus.
#[derive(Debug, Clone)]
pub struct RouterDescriptor {
    pub router_type: String,
    pub address: String,
    pub sensor_kinds: Vec<String>,
    pub data_keys: Vec<String>,
}

/// Router id → descriptor, injected at construction so tests can
/// substitute their own table.
#[derive(Debug, Clone)]
pub struct RouterTypeTable {
    routers: BTreeMap<String, RouterDescriptor>,
    /// Kinds assumed for routers missing from the table.
    fallback_kinds: Vec<String>,
}

impl Default for RouterTypeTable {
    fn default() -> Self {
        let mut routers = BTreeMap::new();
        routers.insert(
            "107".to_string(),
            RouterDescriptor {
                router_type: "bmp280".to_string(),
                address: "41".to_string(),
                sensor_kinds: strings(&["temperature", "humidity", "pressure", "altitude"]),
                data_keys: strings(&["WT", "WH", "PR", "AL"]),
            },
        );
        routers.insert(
            "108".to_string(),
            RouterDescriptor {
                router_type: "mics4514".to_string(),
                address: "52".to_string(),
                sensor_kinds: strings(&["co", "no2"]),
                data_keys: strings(&["CO", "NO"]),
            },
        );
        routers.insert(
            "109".to_string(),
            RouterDescriptor {
                router_type: "loadcell".to_string(),
                address: "66".to_string(),
                sensor_kinds: strings(&["weight", "load"]),
                data_keys: strings(&["WG"]),
            },
        );
        routers.insert(
            "110".to_string(),
            RouterDescriptor {
                router_type: "mq2".to_string(),
                address: "58".to_string(),
                sensor_kinds: strings(&["gas", "smoke", "lpg"]),
                data_keys: strings(&["GS", "LPG"]),
            },
        );
        RouterTypeTable {
            routers,
            fallback_kinds: strings(&["temperature", "humidity"]),
        }
    }
}

impl RouterTypeTable {
    pub fn new(routers: BTreeMap<String, RouterDescriptor>, fallback_kinds: Vec<String>) -> Self {
        RouterTypeTable {
            routers,
            fallback_kinds,
        }
    }

    pub fn descriptor(&self, router_id: &str) -> Option<&RouterDescriptor> {
        self.routers.get(router_id)
    }

    pub fn sensor_kinds(&self, router_id: &str) -> Vec<String> {
        self.routers
            .get(router_id)
            .map(|d| d.sensor_kinds.clone())
            .unwrap_or_else(|| self.fallback_kinds.clone())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Matched {
        device: Device,
        /// True when this reading caused the device record to be created.
        created: bool,
    },
    Unmatched {
        router_id: String,
        sensor_id: Option<String>,
    },
}

pub struct DeviceResolver<S> {
    store: Arc<S>,
    router_table: RouterTypeTable,
}

impl<S: DeviceRegistry + OwnerLookup> DeviceResolver<S> {
    pub fn new(store: Arc<S>, router_table: RouterTypeTable) -> Self {
        DeviceResolver {
            store,
            router_table,
        }
    }

    /// First match wins: exact `(router, sensor)`, then router alone when
    /// no sensor id was supplied, then lazy creation for routers with an
    /// inferable owner. Anything else is unmatched and never stored.
    pub async fn resolve(&self, raw: &RawReading) -> Result<Resolution> {
        let sensor_id = raw.sensor_id.as_deref();

        let found = match self.store.find_device(&raw.router_id, sensor_id).await? {
            Some(device) => Some((device, false)),
            None => self.create_for_inferred_owner(raw).await?,
        };

        let Some((device, created)) = found else {
            debug!(
                router_id = %raw.router_id,
                sensor_id = ?raw.sensor_id,
                "no registered device and no inferable owner"
            );
            return Ok(Resolution::Unmatched {
                router_id: raw.router_id.clone(),
                sensor_id: raw.sensor_id.clone(),
            });
        };

        let device = self.touch(device, raw).await?;
        Ok(Resolution::Matched { device, created })
    }

    /// Synthesize a device from the router-type table when the router is
    /// configured on a hive. Insert-if-absent makes creation idempotent
    /// under concurrent resolutions for the same router.
    async fn create_for_inferred_owner(
        &self,
        raw: &RawReading,
    ) -> Result<Option<(Device, bool)>> {
        let Some(owner) = self.store.find_owner_for_router(&raw.router_id).await? else {
            return Ok(None);
        };

        let device = Device {
            id: Uuid::new_v4(),
            router_id: raw.router_id.clone(),
            sensor_id: raw.sensor_id.clone(),
            device_id: raw.device_id.clone(),
            owner_id: owner.owner_id,
            hive_id: owner.hive_id,
            apiary_id: owner.apiary_id,
            sensor_kinds: self.router_table.sensor_kinds(&raw.router_id),
            battery_level: Some(raw.battery_level.unwrap_or(DEFAULT_BATTERY)),
            last_seen_at: None,
            status: DeviceStatus::Active,
        };

        let (stored, created) = self.store.insert_device_if_absent(device).await?;
        if created {
            info!(
                router_id = %raw.router_id,
                device_id = %stored.device_id,
                kinds = ?stored.sensor_kinds,
                "created device on first contact"
            );
        }
        Ok(Some((stored, created)))
    }

    /// Mirror liveness onto the matched device.
    async fn touch(&self, mut device: Device, raw: &RawReading) -> Result<Device> {
        let now = Utc::now();
        let battery = raw.battery_level.or(device.battery_level);
        let status = match battery {
            Some(level) if level <= LOW_BATTERY_CUTOFF => DeviceStatus::LowBattery,
            _ => DeviceStatus::Active,
        };
        self.store
            .update_device_liveness(device.id, now, battery, status)
            .await?;
        device.last_seen_at = Some(now);
        device.battery_level = battery;
        device.status = status;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::{OwnerRef, Values};

    fn raw(router_id: &str, sensor_id: Option<&str>) -> RawReading {
        RawReading {
            device_id: format!("BT{router_id}"),
            router_id: router_id.to_string(),
            sensor_id: sensor_id.map(str::to_string),
            values: Values::from([("temperature".to_string(), 25.0)]),
            battery_level: Some(85),
            signal_strength: Some(-65),
            timestamp: None,
        }
    }

    fn owner(owner_id: &str) -> OwnerRef {
        OwnerRef {
            owner_id: owner_id.to_string(),
            hive_id: Some("hive-1".to_string()),
            apiary_id: None,
        }
    }

    fn resolver(store: Arc<MemoryStore>) -> DeviceResolver<MemoryStore> {
        DeviceResolver::new(store, RouterTypeTable::default())
    }

    #[tokio::test]
    async fn test_exact_match_on_router_and_sensor() {
        let store = Arc::new(MemoryStore::new());
        store.seed_owner("107", owner("user-1"));
        let resolver = resolver(store.clone());

        let first = resolver.resolve(&raw("107", Some("1013"))).await.unwrap();
        let Resolution::Matched { device, created } = first else {
            panic!("expected match");
        };
        assert!(created);
        assert_eq!(device.owner_id, "user-1");
        assert_eq!(device.hive_id.as_deref(), Some("hive-1"));

        let second = resolver.resolve(&raw("107", Some("1013"))).await.unwrap();
        let Resolution::Matched { device: again, created } = second else {
            panic!("expected match");
        };
        assert!(!created);
        assert_eq!(again.id, device.id);
        assert_eq!(store.device_count(), 1);
    }

    #[tokio::test]
    async fn test_router_only_match_when_no_sensor_supplied() {
        let store = Arc::new(MemoryStore::new());
        store.seed_owner("107", owner("user-1"));
        let resolver = resolver(store.clone());

        let Resolution::Matched { device, .. } =
            resolver.resolve(&raw("107", Some("1013"))).await.unwrap()
        else {
            panic!("expected match");
        };

        let Resolution::Matched { device: found, created } =
            resolver.resolve(&raw("107", None)).await.unwrap()
        else {
            panic!("expected match");
        };
        assert!(!created);
        assert_eq!(found.id, device.id);
    }

    #[tokio::test]
    async fn test_created_device_uses_router_table_kinds() {
        let store = Arc::new(MemoryStore::new());
        store.seed_owner("108", owner("user-2"));
        let resolver = resolver(store.clone());

        let Resolution::Matched { device, created } =
            resolver.resolve(&raw("108", Some("1002"))).await.unwrap()
        else {
            panic!("expected match");
        };
        assert!(created);
        assert_eq!(device.sensor_kinds, vec!["co", "no2"]);
    }

    #[tokio::test]
    async fn test_unknown_router_falls_back_to_default_kinds() {
        let store = Arc::new(MemoryStore::new());
        store.seed_owner("250", owner("user-3"));
        let resolver = resolver(store.clone());

        let Resolution::Matched { device, .. } =
            resolver.resolve(&raw("250", None)).await.unwrap()
        else {
            panic!("expected match");
        };
        assert_eq!(device.sensor_kinds, vec!["temperature", "humidity"]);
    }

    #[tokio::test]
    async fn test_unmatched_without_owner() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone());

        let result = resolver.resolve(&raw("999", None)).await.unwrap();
        let Resolution::Unmatched { router_id, .. } = result else {
            panic!("expected unmatched");
        };
        assert_eq!(router_id, "999");
        assert_eq!(store.device_count(), 0);
    }

    #[tokio::test]
    async fn test_match_updates_liveness_and_battery_status() {
        let store = Arc::new(MemoryStore::new());
        store.seed_owner("107", owner("user-1"));
        let resolver = resolver(store.clone());

        resolver.resolve(&raw("107", None)).await.unwrap();
        let mut low = raw("107", None);
        low.battery_level = Some(10);
        let Resolution::Matched { device, .. } = resolver.resolve(&low).await.unwrap() else {
            panic!("expected match");
        };
        assert_eq!(device.battery_level, Some(10));
        assert_eq!(device.status, DeviceStatus::LowBattery);
        assert!(device.last_seen_at.is_some());
    }
}
