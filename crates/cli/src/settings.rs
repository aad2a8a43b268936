// Layered configuration: defaults, then TOML file, then PROBEWEAVE__* environment
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use probeweave_core::application::{
    CacheConfig, OrchestratorConfig, ResilienceConfig, ScannerConfig,
};
use probeweave_infra_system::command_probe::{CommandSpec, DEFAULT_ENV_ALLOWLIST};

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_NAME: &str = "probeweave";

/// `cache.database_url` value that keeps the cache in process
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scanner: ScannerConfig,
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
    /// Command line per probe kind
    pub probes: HashMap<String, CommandSpec>,
    /// Environment variables passed through to probe subprocesses
    pub env_allowlist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scanner: ScannerConfig::default(),
            resilience: ResilienceConfig::default(),
            cache: CacheConfig::default(),
            probes: HashMap::new(),
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Settings {
    pub fn engine_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            scanner: self.scanner.clone(),
            resilience: self.resilience.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Durable cache location, `None` for an in-process cache
    pub fn cache_database_url(&self) -> Option<String> {
        match self.cache.database_url.as_deref() {
            Some(MEMORY_DATABASE_URL) | Some("") => None,
            Some(url) => Some(url.to_string()),
            None => default_database_url(),
        }
    }
}

/// `sqlite://<data dir>/cache.db`, creating the directory
fn default_database_url() -> Option<String> {
    let dirs = ProjectDirs::from("", "", "probeweave")?;
    let data_dir = dirs.data_dir();
    std::fs::create_dir_all(data_dir).ok()?;
    Some(format!("sqlite://{}", data_dir.join("cache.db").display()))
}

pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let mut builder = config::Config::builder();

    builder = match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            builder.add_source(config::File::from(path.to_path_buf()).required(true))
        }
        None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
    };

    builder = builder.add_source(
        config::Environment::with_prefix("PROBEWEAVE")
            .separator("__")
            .try_parsing(true),
    );

    builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")
}
