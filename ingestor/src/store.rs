//! Reading construction and quality scoring.
//!
//! The score starts at 100 and loses points for weak battery, weak signal
//! and stale timestamps, then buckets into excellent/good/fair/poor.

use crate::model::{Anomaly, Device, Quality, RawReading, Reading};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub fn quality_score(battery_level: Option<u8>, signal_strength: Option<i32>, age_minutes: i64) -> u8 {
    let mut score: i32 = 100;

    match battery_level {
        Some(battery) if battery < 20 => score -= 30,
        Some(battery) if battery < 50 => score -= 10,
        _ => {}
    }

    match signal_strength {
        Some(signal) if signal < -80 => score -= 20,
        Some(signal) if signal < -60 => score -= 10,
        _ => {}
    }

    if age_minutes > 60 {
        score -= 20;
    } else if age_minutes > 30 {
        score -= 10;
    }

    score.clamp(0, 100) as u8
}

pub fn quality_bucket(score: u8) -> Quality {
    match score {
        90..=100 => Quality::Excellent,
        70..=89 => Quality::Good,
        50..=69 => Quality::Fair,
        _ => Quality::Poor,
    }
}

/// Build the immutable record for a matched `(Device, RawReading)` pair.
/// Readings without a coordinator timestamp are stamped with the write
/// time, so their age penalty is zero.
pub fn build_reading(
    device: &Device,
    raw: &RawReading,
    anomalies: Vec<Anomaly>,
    now: DateTime<Utc>,
) -> Reading {
    let timestamp = raw.timestamp.unwrap_or(now);
    let age_minutes = (now - timestamp).num_minutes();
    let score = quality_score(raw.battery_level, raw.signal_strength, age_minutes);

    Reading {
        id: Uuid::new_v4(),
        device_ref: device.id,
        timestamp,
        values: raw.values.clone(),
        battery_level: raw.battery_level,
        signal_strength: raw.signal_strength,
        quality: quality_bucket(score),
        anomalies,
    }
}
