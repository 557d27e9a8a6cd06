//! Storage traits behind which the document store sits.
//!
//! The pipeline is single-threaded per process but may run in multiple
//! processes, so device creation relies on insert-if-absent semantics at
//! the storage layer rather than in-process locking.

use crate::errors::Result;
use crate::model::{Device, DeviceStatus, OwnerRef, Reading};
use chrono::{DateTime, Utc};
use std::future::Future;
use uuid::Uuid;

pub trait DeviceRegistry: Send + Sync {
    /// Look up a registered device. With a sensor id the match is exact on
    /// `(router_id, sensor_id)`; without one it matches on router id alone.
    fn find_device(
        &self,
        router_id: &str,
        sensor_id: Option<&str>,
    ) -> impl Future<Output = Result<Option<Device>>> + Send;

    /// Insert unless a device with the same router id already exists; the
    /// surviving record is returned either way, so racing resolutions for
    /// one router converge on a single device. The flag is true when the
    /// insert won.
    fn insert_device_if_absent(
        &self,
        device: Device,
    ) -> impl Future<Output = Result<(Device, bool)>> + Send;

    /// Mirror liveness fields onto the device record for cheap dashboard
    /// reads. Eventually consistent with the reading history.
    fn update_device_liveness(
        &self,
        id: Uuid,
        last_seen_at: DateTime<Utc>,
        battery_level: Option<u8>,
        status: DeviceStatus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Devices seen since the given instant.
    fn active_devices(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Device>>> + Send;
}

/// Owner inference for routers that are configured on a hive but have no
/// device record yet. Keeps the resolver free of hive/apiary schema
/// knowledge.
pub trait OwnerLookup: Send + Sync {
    fn find_owner_for_router(
        &self,
        router_id: &str,
    ) -> impl Future<Output = Result<Option<OwnerRef>>> + Send;
}

pub trait ReadingRepository: Send + Sync {
    /// Append-only write; no update or delete exists on this contract.
    fn append_reading(&self, reading: &Reading) -> impl Future<Output = Result<()>> + Send;

    /// The immediately preceding reading for a device, if any.
    fn latest_reading(
        &self,
        device_ref: Uuid,
    ) -> impl Future<Output = Result<Option<Reading>>> + Send;

    /// Recent readings for a device, oldest first, bounded to the most
    /// recent `limit` points at or after `since`.
    fn recent_readings(
        &self,
        device_ref: Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Reading>>> + Send;
}

/// Everything the pipeline needs from one backing store.
pub trait Storage: DeviceRegistry + OwnerLookup + ReadingRepository + 'static {}

impl<S: DeviceRegistry + OwnerLookup + ReadingRepository + 'static> Storage for S {}
