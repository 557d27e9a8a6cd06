//! Anomaly detection: sudden deltas against the previous reading, fixed
//! range checks, and a statistical pass over recent history.
//!
//! Everything here is a pure function of the supplied data; fetching
//! history is the pipeline's job.

use crate::model::{AlertKind, Anomaly, Severity, Values};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-parameter sudden-change thresholds. Built from defaults plus the
/// configured override table so tests can substitute their own.
#[derive(Debug, Clone)]
pub struct DeltaThresholds(BTreeMap<String, f64>);

impl Default for DeltaThresholds {
    fn default() -> Self {
        DeltaThresholds(BTreeMap::from([
            ("temperature".to_string(), 10.0),
            ("humidity".to_string(), 30.0),
            ("weight".to_string(), 5.0),
        ]))
    }
}

impl DeltaThresholds {
    pub fn with_overrides(overrides: &BTreeMap<String, f64>) -> Self {
        let mut thresholds = DeltaThresholds::default();
        for (parameter, threshold) in overrides {
            thresholds.0.insert(parameter.clone(), *threshold);
        }
        thresholds
    }

    pub fn get(&self, parameter: &str) -> Option<f64> {
        self.0.get(parameter).copied()
    }
}

/// Flag parameters present in both readings whose absolute delta strictly
/// exceeds the configured threshold.
pub fn delta_anomalies(
    previous: &Values,
    current: &Values,
    thresholds: &DeltaThresholds,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for (parameter, &current_value) in current {
        let Some(threshold) = thresholds.get(parameter) else {
            continue;
        };
        let Some(&previous_value) = previous.get(parameter) else {
            continue;
        };
        let delta = (current_value - previous_value).abs();
        if delta > threshold {
            anomalies.push(Anomaly {
                parameter: parameter.clone(),
                previous_value,
                current_value,
                delta,
                threshold_exceeded: threshold,
                severity: Severity::Medium,
            });
        }
    }
    anomalies
}

/// A history-independent threshold violation, published as a transient
/// alert and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdAlert {
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
}

/// Fixed-range checks on the current values and battery level.
pub fn threshold_alerts(values: &Values, battery_level: Option<u8>) -> Vec<ThresholdAlert> {
    let mut alerts = Vec::new();

    if let Some(&temperature) = values.get("temperature") {
        if temperature > 35.0 {
            alerts.push(ThresholdAlert {
                kind: AlertKind::HighTemperature,
                message: format!("High temperature: {temperature}°C"),
                severity: Severity::Critical,
            });
        } else if temperature < 10.0 {
            alerts.push(ThresholdAlert {
                kind: AlertKind::LowTemperature,
                message: format!("Low temperature: {temperature}°C"),
                severity: Severity::Warning,
            });
        }
    }

    if let Some(&humidity) = values.get("humidity") {
        if !(20.0..=90.0).contains(&humidity) {
            alerts.push(ThresholdAlert {
                kind: AlertKind::HumidityOutOfRange,
                message: format!("Humidity out of range: {humidity}%"),
                severity: Severity::Warning,
            });
        }
    }

    if let Some(battery) = battery_level {
        if battery < 20 {
            alerts.push(ThresholdAlert {
                kind: AlertKind::LowBattery,
                message: format!("Low battery: {battery}%"),
                severity: Severity::Warning,
            });
        }
    }

    alerts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Stable,
    Increasing,
    Decreasing,
}

/// Informational per-parameter summary over the rolling history window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterTrend {
    pub parameter: String,
    pub direction: Trend,
    pub change_percent: f64,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub samples: usize,
}

/// Summarize each parameter seen in the window (oldest first). Parameters
/// with fewer than two samples, or a zero first sample, are skipped since
/// the percent change is undefined for them.
pub fn parameter_trends(history: &[Values]) -> Vec<ParameterTrend> {
    let mut parameters: Vec<&String> = history.iter().flat_map(|v| v.keys()).collect();
    parameters.sort();
    parameters.dedup();

    let mut trends = Vec::new();
    for parameter in parameters {
        let series: Vec<f64> = history
            .iter()
            .filter_map(|values| values.get(parameter).copied())
            .collect();
        if series.len() < 2 {
            continue;
        }
        let first = series[0];
        let last = series[series.len() - 1];
        if first == 0.0 {
            continue;
        }
        let change_percent = (last - first) / first * 100.0;
        let direction = if change_percent.abs() < 5.0 {
            Trend::Stable
        } else if change_percent > 0.0 {
            Trend::Increasing
        } else {
            Trend::Decreasing
        };

        let min = series.iter().copied().fold(f64::INFINITY, f64::min);
        let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = series.iter().sum::<f64>() / series.len() as f64;

        trends.push(ParameterTrend {
            parameter: parameter.clone(),
            direction,
            change_percent,
            min,
            mean,
            max,
            samples: series.len(),
        });
    }
    trends
}
