//! The shared processing chain: resolve → store ∥ detect → publish.
//!
//! Both ingress paths feed this: the transport worker drains the reader
//! channel, and the HTTP handler calls [`Pipeline::process`] directly so
//! it can report the outcome to its caller.

use crate::anomaly::{self, DeltaThresholds};
use crate::errors::Result;
use crate::metrics::{
    ANOMALIES_TOTAL, DEVICES_CREATED_TOTAL, INGEST_LATENCY_SECONDS, PERSIST_FAILURES_TOTAL,
    READINGS_TOTAL, UNMATCHED_TOTAL,
};
use crate::model::{AlertKind, RawReading, Reading, Severity};
use crate::publish::{AlertEvent, Event, Publisher, ReadingEvent};
use crate::resolve::{DeviceResolver, Resolution, RouterTypeTable};
use crate::storage::Storage;
use crate::store::build_reading;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Rolling-history bounds for the statistical pass.
#[derive(Debug, Clone, Copy)]
pub struct HistoryWindow {
    pub days: i64,
    pub max_points: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        HistoryWindow {
            days: 30,
            max_points: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Stored(Reading),
    /// Dropped without a reading; one diagnostic event was published.
    Unmatched,
}

pub struct Pipeline<S> {
    store: Arc<S>,
    resolver: DeviceResolver<S>,
    publisher: Arc<Publisher>,
    thresholds: DeltaThresholds,
    history: HistoryWindow,
}

impl<S: Storage> Pipeline<S> {
    pub fn new(
        store: Arc<S>,
        router_table: RouterTypeTable,
        publisher: Arc<Publisher>,
        thresholds: DeltaThresholds,
        history: HistoryWindow,
    ) -> Self {
        Pipeline {
            resolver: DeviceResolver::new(store.clone(), router_table),
            store,
            publisher,
            thresholds,
            history,
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Run one decoded reading through the whole chain. Unresolved input is
    /// dropped (diagnostic only), never stored as an orphan reading.
    pub async fn process(&self, raw: RawReading) -> Result<Outcome> {
        let started = Instant::now();

        let (device, created) = match self.resolver.resolve(&raw).await? {
            Resolution::Matched { device, created } => (device, created),
            Resolution::Unmatched {
                router_id,
                sensor_id,
            } => {
                UNMATCHED_TOTAL.inc();
                warn!(%router_id, ?sensor_id, "reading from unregistered device dropped");
                self.publisher.publish_diagnostic(Event::UnmatchedDevice {
                    router_id,
                    sensor_id,
                    timestamp: Utc::now(),
                });
                return Ok(Outcome::Unmatched);
            }
        };
        if created {
            DEVICES_CREATED_TOTAL.inc();
        }

        let previous = self.store.latest_reading(device.id).await?;
        let anomalies = match &previous {
            Some(previous) => anomaly::delta_anomalies(&previous.values, &raw.values, &self.thresholds),
            None => Vec::new(),
        };
        if !anomalies.is_empty() {
            ANOMALIES_TOTAL.inc_by(anomalies.len() as f64);
            info!(
                device_id = %device.device_id,
                count = anomalies.len(),
                "delta anomalies detected"
            );
        }

        let reading = build_reading(&device, &raw, anomalies, Utc::now());
        if let Err(e) = self.store.append_reading(&reading).await {
            PERSIST_FAILURES_TOTAL.inc();
            error!(
                device_id = %device.device_id,
                values = ?reading.values,
                error = %e,
                "failed to persist reading, dropped (at-most-once write)"
            );
            return Err(e);
        }
        READINGS_TOTAL.inc();

        let trends = self.history_trends(&reading).await;

        let mut alerts = anomaly::threshold_alerts(&reading.values, reading.battery_level);
        if reading.anomalies.iter().any(|a| a.parameter == "weight") {
            alerts.push(anomaly::ThresholdAlert {
                kind: AlertKind::WeightAnomaly,
                message: "Sudden hive weight change detected".to_string(),
                severity: Severity::Info,
            });
        }

        self.publisher.publish(
            &device.owner_id,
            Event::Reading(ReadingEvent {
                owner_id: device.owner_id.clone(),
                device_id: device.device_id.clone(),
                timestamp: reading.timestamp,
                values: reading.values.clone(),
                quality: reading.quality,
                anomalies: reading.anomalies.clone(),
                trends,
            }),
        );
        for alert in alerts {
            self.publisher.publish(
                &device.owner_id,
                Event::Alert(AlertEvent {
                    owner_id: device.owner_id.clone(),
                    device_id: device.device_id.clone(),
                    kind: alert.kind,
                    message: alert.message,
                    severity: alert.severity,
                    timestamp: Utc::now(),
                }),
            );
        }

        INGEST_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        Ok(Outcome::Stored(reading))
    }

    /// Statistical pass over the rolling window, including the reading just
    /// written. Informational only; a failed fetch degrades to no trends.
    async fn history_trends(&self, reading: &Reading) -> Vec<anomaly::ParameterTrend> {
        let since = Utc::now() - Duration::days(self.history.days);
        match self
            .store
            .recent_readings(reading.device_ref, since, self.history.max_points)
            .await
        {
            Ok(history) => {
                let series: Vec<_> = history.into_iter().map(|r| r.values).collect();
                anomaly::parameter_trends(&series)
            }
            Err(e) => {
                warn!(error = %e, "history fetch failed, skipping trend analysis");
                Vec::new()
            }
        }
    }
}

/// Drain the reader channel, one reading processed to completion at a
/// time. Pipeline errors on this path have no caller to notify and are
/// only logged.
pub async fn run_worker<S: Storage>(mut rx: mpsc::Receiver<RawReading>, pipeline: Arc<Pipeline<S>>) {
    info!("pipeline worker started");
    while let Some(raw) = rx.recv().await {
        if let Err(e) = pipeline.process(raw).await {
            error!(error = %e, "pipeline processing failed");
        }
    }
    info!("pipeline worker stopped, channel closed");
}
