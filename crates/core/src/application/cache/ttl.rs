// Cache TTL Policy
// Precedence: explicit override > probe kind > scan class > global default

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const HOUR: u64 = 3600;

/// Global default TTL (1 hour)
pub const DEFAULT_TTL_SECS: u64 = HOUR;

const SCAN_CLASS_TTL_SECS: &[(&str, u64)] = &[
    ("quick_scan", HOUR),
    ("normal_scan", 2 * HOUR),
    ("deep_scan", 4 * HOUR),
    ("vulnerability_scan", 6 * HOUR),
];

const PROBE_TTL_SECS: &[(&str, u64)] = &[
    ("httpx", 30 * 60),
    ("nmap", 2 * HOUR),
    ("nuclei", 6 * HOUR),
    ("sqlmap", 4 * HOUR),
    ("subfinder", 24 * HOUR), // subdomains change slowly
    ("amass", 24 * HOUR),
    ("nikto", 4 * HOUR),
];

/// Cache configuration (`[cache]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Durable backend location; `None` keeps the cache in process
    pub database_url: Option<String>,
    pub default_ttl_secs: u64,
    /// Background sweep interval; 0 disables the sweeper
    pub sweep_interval_secs: u64,
    pub scan_class_ttl_secs: HashMap<String, u64>,
    pub probe_ttl_secs: HashMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_url: None,
            default_ttl_secs: DEFAULT_TTL_SECS,
            sweep_interval_secs: 600,
            scan_class_ttl_secs: HashMap::new(),
            probe_ttl_secs: HashMap::new(),
        }
    }
}

/// Resolved TTL tables
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default_ttl: Duration,
    by_class: HashMap<String, Duration>,
    by_kind: HashMap<String, Duration>,
}

impl TtlPolicy {
    /// Built-in tables only
    pub fn builtin() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            by_class: to_durations(SCAN_CLASS_TTL_SECS.iter().map(|(k, v)| (*k, *v))),
            by_kind: to_durations(PROBE_TTL_SECS.iter().map(|(k, v)| (*k, *v))),
        }
    }

    /// Built-in tables with configured entries layered on top
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut policy = Self::builtin();
        policy.default_ttl = Duration::from_secs(config.default_ttl_secs);
        policy.by_class.extend(to_durations(
            config.scan_class_ttl_secs.iter().map(|(k, v)| (k.as_str(), *v)),
        ));
        policy.by_kind.extend(to_durations(
            config.probe_ttl_secs.iter().map(|(k, v)| (k.as_str(), *v)),
        ));
        policy
    }

    pub fn resolve(
        &self,
        probe_kind: &str,
        scan_class: Option<&str>,
        explicit: Option<Duration>,
    ) -> Duration {
        explicit
            .or_else(|| self.by_kind.get(probe_kind).copied())
            .or_else(|| scan_class.and_then(|class| self.by_class.get(class).copied()))
            .unwrap_or(self.default_ttl)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

fn to_durations<'a>(pairs: impl Iterator<Item = (&'a str, u64)>) -> HashMap<String, Duration> {
    pairs
        .map(|(k, secs)| (k.to_string(), Duration::from_secs(secs)))
        .collect()
}
