//! Wire-format decoding.
//!
//! Three incompatible shapes arrive from the coordinator and are collapsed
//! into one canonical [`RawReading`]:
//!
//! - delimited numeric: `BT107:25.5,65.2,45.8:85:-65`
//! - key-tagged text:   `RID:107; SID:1013; WT: 25.62`
//! - structured JSON (HTTP ingestion body)
//!
//! Decoding is pure; callers decide what to do with failures.

use crate::model::{RawReading, Values};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Prefix used to synthesize a device alias from a bare router id.
const DEVICE_ID_PREFIX: &str = "BT";

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const HUMIDITY_MIN: f64 = 0.0;
const HUMIDITY_MAX: f64 = 100.0;
const SIGNAL_MIN: i32 = -120;
const SIGNAL_MAX: i32 = 0;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unrecognized line shape: {0:?}")]
    UnknownShape(String),

    #[error("numeric group has arity {arity}, expected 3 or 4")]
    BadArity { arity: usize },

    #[error("invalid {field} value {value:?}")]
    BadNumber { field: &'static str, value: String },

    #[error("malformed key-tagged line: {0:?}")]
    BadSegment(String),

    #[error("{field} {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("missing field {0}")]
    MissingField(&'static str),
}

/// Line-level shapes the transport reader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineShape {
    Delimited,
    KeyTagged,
}

/// Cheap structural check used by the transport reader before decoding.
pub fn detect(line: &str) -> Option<LineShape> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.contains("RID:") && line.contains("SID:") {
        return Some(LineShape::KeyTagged);
    }
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() == 4 && parts.iter().all(|p| !p.is_empty()) {
        return Some(LineShape::Delimited);
    }
    None
}

/// Decode one newline-framed line from the serial/TCP transport.
pub fn decode_line(line: &str) -> Result<RawReading, DecodeError> {
    let line = line.trim();
    match detect(line) {
        Some(LineShape::KeyTagged) => decode_key_tagged(line),
        Some(LineShape::Delimited) => decode_delimited(line),
        None => Err(DecodeError::UnknownShape(line.to_string())),
    }
}

/// `<deviceId>:<v1,..,vN>:<battery>:<signal>`. The arity of the numeric
/// group selects the schema.
fn decode_delimited(line: &str) -> Result<RawReading, DecodeError> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 4 {
        return Err(DecodeError::UnknownShape(line.to_string()));
    }
    let device_id = parts[0].to_string();
    if device_id.is_empty() {
        return Err(DecodeError::MissingField("deviceId"));
    }

    let numbers = parts[1]
        .split(',')
        .map(|v| {
            v.trim().parse::<f64>().map_err(|_| DecodeError::BadNumber {
                field: "sensorData",
                value: v.to_string(),
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let schema: &[&str] = match numbers.len() {
        3 => &["temperature", "humidity", "weight"],
        4 => &["temperature", "humidity", "weight", "gasLevel"],
        arity => return Err(DecodeError::BadArity { arity }),
    };
    let values: Values = schema
        .iter()
        .map(|k| k.to_string())
        .zip(numbers.iter().copied())
        .collect();

    let battery = parse_battery(parts[2])?;
    let signal = parts[3]
        .trim()
        .parse::<i32>()
        .map_err(|_| DecodeError::BadNumber {
            field: "signalStrength",
            value: parts[3].to_string(),
        })?;

    Ok(RawReading {
        router_id: router_id_from_device(&device_id),
        device_id,
        sensor_id: None,
        values,
        battery_level: Some(battery),
        signal_strength: Some(signal),
        timestamp: None,
    })
}

/// `RID:<routerId>; SID:<sensorId>; <KEY>: <value>`, exactly one key/value
/// pair per line. Battery and signal are not carried by this shape and stay
/// absent.
fn decode_key_tagged(line: &str) -> Result<RawReading, DecodeError> {
    let segments: Vec<&str> = line.split(';').map(str::trim).collect();
    if segments.len() != 3 {
        return Err(DecodeError::BadSegment(line.to_string()));
    }

    let router_id = tagged_value(segments[0], "RID")
        .ok_or_else(|| DecodeError::BadSegment(segments[0].to_string()))?;
    let sensor_id = tagged_value(segments[1], "SID")
        .ok_or_else(|| DecodeError::BadSegment(segments[1].to_string()))?;

    let (key, value) = segments[2]
        .split_once(':')
        .ok_or_else(|| DecodeError::BadSegment(segments[2].to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(DecodeError::BadSegment(segments[2].to_string()));
    }
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|_| DecodeError::BadNumber {
            field: "sensorData",
            value: value.trim().to_string(),
        })?;

    let mut values = Values::new();
    values.insert(canonical_parameter(key), value);

    Ok(RawReading {
        device_id: format!("{DEVICE_ID_PREFIX}{router_id}"),
        router_id: router_id.to_string(),
        sensor_id: Some(sensor_id.to_string()),
        values,
        battery_level: None,
        signal_strength: None,
        timestamp: None,
    })
}

fn tagged_value<'a>(segment: &'a str, tag: &str) -> Option<&'a str> {
    let (name, value) = segment.split_once(':')?;
    if name.trim() != tag {
        return None;
    }
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Fixed two-letter key table. Unknown keys pass through lower-cased so new
/// coordinator firmware does not silently drop measurements.
pub fn canonical_parameter(key: &str) -> String {
    match key {
        "WT" => "temperature",
        "WH" => "humidity",
        "PR" => "pressure",
        "AL" => "altitude",
        "CO" => "co",
        "NO" => "no2",
        "WG" => "weight",
        "VB" => "vibration",
        "SD" => "sound",
        "LT" => "light",
        "UV" => "uv",
        "PH" => "ph",
        "MS" => "moisture",
        other => return other.to_ascii_lowercase(),
    }
    .to_string()
}

fn router_id_from_device(device_id: &str) -> String {
    match device_id.strip_prefix(DEVICE_ID_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => device_id.to_string(),
    }
}

fn parse_battery(raw: &str) -> Result<u8, DecodeError> {
    let battery = raw
        .trim()
        .parse::<u8>()
        .map_err(|_| DecodeError::BadNumber {
            field: "batteryLevel",
            value: raw.to_string(),
        })?;
    if battery > 100 {
        return Err(DecodeError::OutOfRange {
            field: "batteryLevel",
            value: battery as f64,
            min: 0.0,
            max: 100.0,
        });
    }
    Ok(battery)
}

/// HTTP ingestion body (structured form).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredReading {
    pub device_id: String,
    pub router_id: Option<String>,
    pub sensor_id: Option<String>,
    pub sensor_data: Values,
    pub battery_level: u8,
    pub signal_strength: Option<i32>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Validate and decode the structured form into a canonical reading.
pub fn decode_structured(body: StructuredReading) -> Result<RawReading, DecodeError> {
    if body.device_id.len() < 3 || body.device_id.len() > 20 {
        return Err(DecodeError::MissingField("deviceId"));
    }
    if body.sensor_data.is_empty() {
        return Err(DecodeError::MissingField("sensorData"));
    }
    if body.battery_level > 100 {
        return Err(DecodeError::OutOfRange {
            field: "batteryLevel",
            value: body.battery_level as f64,
            min: 0.0,
            max: 100.0,
        });
    }
    if let Some(signal) = body.signal_strength {
        if !(SIGNAL_MIN..=SIGNAL_MAX).contains(&signal) {
            return Err(DecodeError::OutOfRange {
                field: "signalStrength",
                value: signal as f64,
                min: SIGNAL_MIN as f64,
                max: SIGNAL_MAX as f64,
            });
        }
    }
    if let Some(&temp) = body.sensor_data.get("temperature") {
        if !(TEMP_MIN..=TEMP_MAX).contains(&temp) {
            return Err(DecodeError::OutOfRange {
                field: "temperature",
                value: temp,
                min: TEMP_MIN,
                max: TEMP_MAX,
            });
        }
    }
    if let Some(&humidity) = body.sensor_data.get("humidity") {
        if !(HUMIDITY_MIN..=HUMIDITY_MAX).contains(&humidity) {
            return Err(DecodeError::OutOfRange {
                field: "humidity",
                value: humidity,
                min: HUMIDITY_MIN,
                max: HUMIDITY_MAX,
            });
        }
    }

    let router_id = match body.router_id {
        Some(id) if !id.is_empty() => id,
        _ => router_id_from_device(&body.device_id),
    };

    Ok(RawReading {
        device_id: body.device_id,
        router_id,
        sensor_id: body.sensor_id.filter(|s| !s.is_empty()),
        values: body.sensor_data,
        battery_level: Some(body.battery_level),
        signal_strength: body.signal_strength,
        timestamp: body.timestamp,
    })
}
