//! Postgres-backed storage.
//!
//! Device creation races across processes are settled by the unique index
//! on `router_id` plus `ON CONFLICT DO NOTHING`; reading writes are
//! at-most-once with no retry.

use crate::errors::Result;
use crate::model::{Device, DeviceStatus, OwnerRef, Quality, Reading, Values};
use crate::storage::{DeviceRegistry, OwnerLookup, ReadingRepository};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<PgStore> {
        info!("connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        info!("database connection established, running migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("migrations completed");

        Ok(PgStore { pool })
    }
}

const DEVICE_COLUMNS: &str = "id, router_id, sensor_id, device_id, owner_id, hive_id, apiary_id, \
     sensor_kinds, battery_level, last_seen_at, status";

fn device_from_row(row: &PgRow) -> sqlx::Result<Device> {
    let battery: Option<i32> = row.try_get("battery_level")?;
    let status: String = row.try_get("status")?;
    Ok(Device {
        id: row.try_get("id")?,
        router_id: row.try_get("router_id")?,
        sensor_id: row.try_get("sensor_id")?,
        device_id: row.try_get("device_id")?,
        owner_id: row.try_get("owner_id")?,
        hive_id: row.try_get("hive_id")?,
        apiary_id: row.try_get("apiary_id")?,
        sensor_kinds: row.try_get("sensor_kinds")?,
        battery_level: battery.map(|b| b.clamp(0, 100) as u8),
        last_seen_at: row.try_get("last_seen_at")?,
        status: DeviceStatus::parse(&status).unwrap_or(DeviceStatus::Error),
    })
}

fn reading_from_row(row: &PgRow) -> sqlx::Result<Reading> {
    let battery: Option<i32> = row.try_get("battery_level")?;
    let quality: String = row.try_get("quality")?;
    let values: Json<Values> = row.try_get("data")?;
    let anomalies: Json<Vec<crate::model::Anomaly>> = row.try_get("anomalies")?;
    Ok(Reading {
        id: row.try_get("id")?,
        device_ref: row.try_get("device_ref")?,
        timestamp: row.try_get("ts")?,
        values: values.0,
        battery_level: battery.map(|b| b.clamp(0, 100) as u8),
        signal_strength: row.try_get("signal_strength")?,
        quality: Quality::parse(&quality).unwrap_or(Quality::Poor),
        anomalies: anomalies.0,
    })
}

impl DeviceRegistry for PgStore {
    async fn find_device(&self, router_id: &str, sensor_id: Option<&str>) -> Result<Option<Device>> {
        let query = match sensor_id {
            Some(_) => format!(
                "SELECT {DEVICE_COLUMNS} FROM devices WHERE router_id = $1 AND sensor_id = $2"
            ),
            None => format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE router_id = $1"),
        };
        let mut q = sqlx::query(&query).bind(router_id);
        if let Some(sensor) = sensor_id {
            q = q.bind(sensor);
        }
        let row = q.fetch_optional(&self.pool).await?;
        row.as_ref().map(device_from_row).transpose().map_err(Into::into)
    }

    async fn insert_device_if_absent(&self, device: Device) -> Result<(Device, bool)> {
        let inserted = sqlx::query(
            "INSERT INTO devices (id, router_id, sensor_id, device_id, owner_id, hive_id, \
             apiary_id, sensor_kinds, battery_level, last_seen_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (router_id) DO NOTHING",
        )
        .bind(device.id)
        .bind(&device.router_id)
        .bind(&device.sensor_id)
        .bind(&device.device_id)
        .bind(&device.owner_id)
        .bind(&device.hive_id)
        .bind(&device.apiary_id)
        .bind(&device.sensor_kinds)
        .bind(device.battery_level.map(|b| b as i32))
        .bind(device.last_seen_at)
        .bind(device.status.as_str())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok((device, true));
        }

        // Lost the race (or the router was already registered); return the
        // surviving record.
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE router_id = $1");
        let row = sqlx::query(&query)
            .bind(&device.router_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((device_from_row(&row)?, false))
    }

    async fn update_device_liveness(
        &self,
        id: Uuid,
        last_seen_at: DateTime<Utc>,
        battery_level: Option<u8>,
        status: DeviceStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET last_seen_at = $2, battery_level = $3, status = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(last_seen_at)
        .bind(battery_level.map(|b| b as i32))
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_devices(&self, since: DateTime<Utc>) -> Result<Vec<Device>> {
        let query = format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE last_seen_at >= $1 ORDER BY last_seen_at DESC"
        );
        let rows = sqlx::query(&query).bind(since).fetch_all(&self.pool).await?;
        rows.iter()
            .map(device_from_row)
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

impl OwnerLookup for PgStore {
    async fn find_owner_for_router(&self, router_id: &str) -> Result<Option<OwnerRef>> {
        let row = sqlx::query(
            "SELECT owner_id, hive_id, apiary_id FROM router_owners WHERE router_id = $1",
        )
        .bind(router_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(|row| -> sqlx::Result<OwnerRef> {
                Ok(OwnerRef {
                    owner_id: row.try_get("owner_id")?,
                    hive_id: row.try_get("hive_id")?,
                    apiary_id: row.try_get("apiary_id")?,
                })
            })
            .transpose()?)
    }
}

impl ReadingRepository for PgStore {
    async fn append_reading(&self, reading: &Reading) -> Result<()> {
        sqlx::query(
            "INSERT INTO readings (id, device_ref, ts, data, battery_level, signal_strength, \
             quality, anomalies) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(reading.id)
        .bind(reading.device_ref)
        .bind(reading.timestamp)
        .bind(Json(&reading.values))
        .bind(reading.battery_level.map(|b| b as i32))
        .bind(reading.signal_strength)
        .bind(reading.quality.as_str())
        .bind(Json(&reading.anomalies))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_reading(&self, device_ref: Uuid) -> Result<Option<Reading>> {
        let row = sqlx::query(
            "SELECT id, device_ref, ts, data, battery_level, signal_strength, quality, anomalies \
             FROM readings WHERE device_ref = $1 ORDER BY ts DESC LIMIT 1",
        )
        .bind(device_ref)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reading_from_row).transpose().map_err(Into::into)
    }

    async fn recent_readings(
        &self,
        device_ref: Uuid,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        // Newest-first limit, then flipped so callers see oldest first.
        let rows = sqlx::query(
            "SELECT id, device_ref, ts, data, battery_level, signal_strength, quality, anomalies \
             FROM readings WHERE device_ref = $1 AND ts >= $2 ORDER BY ts DESC LIMIT $3",
        )
        .bind(device_ref)
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut readings = rows
            .iter()
            .map(reading_from_row)
            .collect::<sqlx::Result<Vec<_>>>()?;
        readings.reverse();
        Ok(readings)
    }
}
