//! Environment-driven configuration.
//!
//! Everything has a default so a bare `cargo run` comes up in HTTP-only
//! mode with an in-memory store.

use crate::model::OwnerRef;
use crate::pipeline::HistoryWindow;
use crate::transport::{ReaderSettings, TransportConfig};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    pub database_url: Option<String>,
    pub transport: TransportConfig,
    pub reader: ReaderSettings,
    pub channel_capacity: usize,
    pub subscriber_capacity: usize,
    pub history: HistoryWindow,
    /// Per-parameter overrides for the sudden-change thresholds.
    pub delta_overrides: BTreeMap<String, f64>,
    /// Router → owner seed used by the in-memory store.
    pub router_owners: Vec<(String, OwnerRef)>,
}

impl Config {
    pub fn from_env() -> Config {
        let transport = if let Ok(path) = env::var("SERIAL_PORT") {
            TransportConfig::Serial {
                path,
                baud: parse_env("SERIAL_BAUD", 9600),
            }
        } else if let Ok(addr) = env::var("TCP_ADDR") {
            TransportConfig::Tcp { addr }
        } else {
            TransportConfig::HttpOnly
        };

        Config {
            http_addr: env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            transport,
            reader: ReaderSettings {
                reconnect_delay: Duration::from_millis(parse_env("RECONNECT_DELAY_MS", 5000)),
                max_reconnect_attempts: parse_env("MAX_RECONNECT_ATTEMPTS", 5),
            },
            channel_capacity: parse_env("CHANNEL_CAPACITY", 1024),
            subscriber_capacity: parse_env("SUBSCRIBER_CAPACITY", 256),
            history: HistoryWindow {
                days: parse_env("HISTORY_WINDOW_DAYS", 30),
                max_points: parse_env("HISTORY_MAX_POINTS", 1000),
            },
            delta_overrides: parse_delta_overrides(
                &env::var("DELTA_THRESHOLDS").unwrap_or_default(),
            ),
            router_owners: parse_router_owners(&env::var("ROUTER_OWNERS").unwrap_or_default()),
        }
    }
}

fn parse_env<T: std::str::FromStr + ToString>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(
                "invalid {} value {:?}, using default {}",
                name,
                value,
                default.to_string()
            );
            default
        }),
        Err(_) => default,
    }
}

/// `"temperature=12,weight=3"` → override table. Bad entries are skipped
/// with a warning rather than failing startup.
pub fn parse_delta_overrides(raw: &str) -> BTreeMap<String, f64> {
    let mut overrides = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('=').map(|(k, v)| (k.trim(), v.trim().parse::<f64>())) {
            Some((parameter, Ok(threshold))) if !parameter.is_empty() => {
                overrides.insert(parameter.to_string(), threshold);
            }
            _ => warn!(entry, "ignoring malformed delta threshold override"),
        }
    }
    overrides
}

/// `"107=user-1:hive-1,108=user-1"` → router/owner seed pairs, with an
/// optional hive id after the colon.
pub fn parse_router_owners(raw: &str) -> Vec<(String, OwnerRef)> {
    let mut owners = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((router_id, rest)) = entry.split_once('=') else {
            warn!(entry, "ignoring malformed router owner entry");
            continue;
        };
        let (owner_id, hive_id) = match rest.split_once(':') {
            Some((owner, hive)) => (owner, Some(hive.to_string())),
            None => (rest, None),
        };
        if router_id.trim().is_empty() || owner_id.trim().is_empty() {
            warn!(entry, "ignoring malformed router owner entry");
            continue;
        }
        owners.push((
            router_id.trim().to_string(),
            OwnerRef {
                owner_id: owner_id.trim().to_string(),
                hive_id,
                apiary_id: None,
            },
        ));
    }
    owners
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_overrides() {
        let overrides = parse_delta_overrides("temperature=12, weight=3.5");
        assert_eq!(overrides.get("temperature"), Some(&12.0));
        assert_eq!(overrides.get("weight"), Some(&3.5));
    }

    #[test]
    fn test_parse_delta_overrides_skips_malformed() {
        let overrides = parse_delta_overrides("temperature=abc,=5,humidity=40");
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides.get("humidity"), Some(&40.0));
    }

    #[test]
    fn test_parse_delta_overrides_empty() {
        assert!(parse_delta_overrides("").is_empty());
    }

    #[test]
    fn test_parse_router_owners() {
        let owners = parse_router_owners("107=user-1:hive-1,108=user-2");
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[0].0, "107");
        assert_eq!(owners[0].1.owner_id, "user-1");
        assert_eq!(owners[0].1.hive_id.as_deref(), Some("hive-1"));
        assert_eq!(owners[1].1.hive_id, None);
    }

    #[test]
    fn test_parse_router_owners_skips_malformed() {
        let owners = parse_router_owners("garbage,=x,107=user-1");
        assert_eq!(owners.len(), 1);
    }
}
