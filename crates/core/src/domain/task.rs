// Scan Task Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Probe parameters (ordered map, canonicalized for fingerprinting)
pub type ProbeParams = BTreeMap<String, serde_json::Value>;

/// Priority (higher number = dispatched earlier)
pub type Priority = i32;

/// Fallback timeout for probe kinds missing from the default table (5 minutes)
pub const FALLBACK_PROBE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default wait timeouts per probe kind, in seconds
const DEFAULT_TIMEOUTS_SECS: &[(&str, u64)] = &[
    ("httpx", 30),
    ("nuclei", 300),
    ("nmap", 120),
    ("nmap-advanced", 300),
    ("sqlmap", 600),
    ("nikto", 300),
    ("gobuster", 180),
    ("feroxbuster", 180),
    ("ffuf", 180),
    ("amass", 600),
    ("subfinder", 60),
    ("katana", 120),
    ("dalfox", 300),
    ("arjun", 120),
    ("masscan", 180),
];

/// Default timeout for a probe kind
pub fn default_timeout(probe_kind: &str) -> Duration {
    DEFAULT_TIMEOUTS_SECS
        .iter()
        .find(|(kind, _)| *kind == probe_kind)
        .map(|(_, secs)| Duration::from_secs(*secs))
        .unwrap_or(FALLBACK_PROBE_TIMEOUT)
}

/// One probe invocation against one target.
///
/// Built once by the caller and handed to the scheduler by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTask {
    pub probe_kind: String,
    pub target: String,
    #[serde(default)]
    pub params: ProbeParams,
    pub timeout: Duration,
    #[serde(default)]
    pub priority: Priority,
}

impl ScanTask {
    /// Create a task with the probe's default timeout and priority 0
    pub fn new(probe_kind: impl Into<String>, target: impl Into<String>) -> Self {
        let probe_kind = probe_kind.into();
        let timeout = default_timeout(&probe_kind);
        Self {
            probe_kind,
            target: target.into(),
            params: ProbeParams::new(),
            timeout,
            priority: 0,
        }
    }

    pub fn with_params(mut self, params: ProbeParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject tasks the scheduler cannot meaningfully run
    pub fn validate(&self) -> Result<()> {
        if self.probe_kind.trim().is_empty() {
            return Err(AppError::Validation("probe_kind must not be empty".to_string()));
        }
        if self.target.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "target for {} must not be empty",
                self.probe_kind
            )));
        }
        if self.timeout.is_zero() {
            return Err(AppError::Validation(format!(
                "timeout for {} must be greater than zero",
                self.probe_kind
            )));
        }
        Ok(())
    }
}
