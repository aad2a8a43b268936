//! Probeweave CLI - runs scan batches through the orchestration engine

mod batch;
mod logging;
mod output;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use probeweave_core::application::{
    CachePolicy, CacheSweeper, Orchestrator, ProgressCallback, ResultCache, TtlPolicy,
};
use probeweave_core::port::{cancel_pair, ProbeRegistry, SystemTimeProvider};
use probeweave_infra_sqlite::{open_cache_db, SqliteCacheBackend};
use probeweave_infra_system::{CommandProbe, CommandSpec, PathToolRegistry};

use batch::{BatchFile, BatchWork};
use settings::{load_settings, Settings};

#[derive(Parser)]
#[command(name = "probeweave")]
#[command(about = "Parallel scan orchestration with caching and fallbacks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); defaults to ./probeweave.toml when present
    #[arg(long, global = true, env = "PROBEWEAVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch file
    Run {
        /// Batch JSON file
        batch: PathBuf,

        /// Override scanner.max_workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Scan class used for TTL selection (overrides the batch file)
        #[arg(long)]
        scan_class: Option<String>,

        /// Ignore cached results and execute every probe
        #[arg(long)]
        force_refresh: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report which scanning tools are installed
    Tools {
        /// Tools to check (default: every known tool)
        names: Vec<String>,

        /// Print an install script for missing tools
        #[arg(long)]
        script: bool,
    },

    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry counts
    Stats,

    /// Delete entries
    Clear {
        /// Glob over cache keys, e.g. "nmap:*"
        #[arg(long, conflicts_with = "kind")]
        pattern: Option<String>,

        /// Delete every entry of one probe kind
        #[arg(long)]
        kind: Option<String>,
    },

    /// Remove expired entries now
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            batch,
            workers,
            scan_class,
            force_refresh,
            json,
        } => {
            if let Some(workers) = workers {
                settings.scanner.max_workers = workers;
            }
            let batch = BatchFile::load(&batch)?;

            tokio::select! {
                result = run_batch(&settings, batch, scan_class, force_refresh, json) => result?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, abandoning batch");
                    eprintln!("{}", "✗ Interrupted".red().bold());
                }
            }
        }

        Commands::Tools { names, script } => {
            let tools = PathToolRegistry::new();
            let report = if names.is_empty() {
                tools.system_report()
            } else {
                tools.availability_report(&names)
            };

            if script {
                match report.install_script() {
                    Some(script) => println!("{}", script),
                    None => println!("{}", "✓ All tools installed".green().bold()),
                }
            } else {
                output::print_tool_report(&report);
            }
        }

        Commands::Cache { action } => {
            let cache = build_cache(&settings).await;
            match action {
                CacheAction::Stats => {
                    let stats = cache.stats().await;
                    output::print_cache_stats(&stats, cache.degraded_reason());
                }
                CacheAction::Clear { pattern, kind } => {
                    let pattern = kind.map(|k| ResultCache::kind_pattern(&k)).or(pattern);
                    let deleted = cache.clear(pattern.as_deref()).await;
                    println!("{}", format!("✓ {} entries deleted", deleted).green().bold());
                }
                CacheAction::Sweep => {
                    let removed = cache.cleanup_expired().await;
                    println!("{}", format!("✓ {} expired entries removed", removed).green().bold());
                }
            }
        }
    }

    Ok(())
}

async fn run_batch(
    settings: &Settings,
    batch: BatchFile,
    scan_class: Option<String>,
    force_refresh: bool,
    json: bool,
) -> Result<()> {
    let mut specs = settings.probes.clone();
    specs.extend(batch.probes.clone());
    for kind in batch.probe_kinds() {
        if !specs.contains_key(&kind) {
            warn!(probe_kind = %kind, "No command configured for probe");
        }
    }

    let cache = build_cache(settings).await;
    let orchestrator = Orchestrator::new(
        &settings.engine_config(),
        Arc::clone(&cache),
        Arc::new(PathToolRegistry::new()),
        build_probes(&specs, &settings.env_allowlist),
    )
    .context("Failed to initialize orchestrator")?;

    let (stop_sweeper, sweeper_token) = cancel_pair();
    if settings.cache.enabled && settings.cache.sweep_interval_secs > 0 {
        let sweeper = CacheSweeper::new(
            Arc::clone(&cache),
            Duration::from_secs(settings.cache.sweep_interval_secs),
        );
        tokio::spawn(sweeper.run(sweeper_token));
    }

    let policy = CachePolicy::new(scan_class.or(batch.scan_class.clone()), force_refresh);

    let mut report_progress = |done: usize, total: usize, kind: &str| {
        eprintln!("{} {}", format!("[{}/{}]", done, total).dimmed(), kind);
    };
    let progress: ProgressCallback<'_> = &mut report_progress;

    let results = match batch.into_work() {
        BatchWork::Parallel(tasks) => {
            info!(tasks = tasks.len(), "Running batch");
            orchestrator
                .execute_parallel(tasks, &policy, Some(progress))
                .await
        }
        BatchWork::Groups(groups) => {
            info!(groups = groups.len(), "Running grouped batch");
            orchestrator
                .execute_groups(groups, &policy, Some(progress))
                .await
        }
    };
    stop_sweeper.cancel();

    if json {
        output::print_results_json(&results)?;
    } else {
        output::print_results(&results);
    }
    Ok(())
}

/// Durable SQLite cache when configured and reachable, in-process otherwise
async fn build_cache(settings: &Settings) -> Arc<ResultCache> {
    let ttl = TtlPolicy::from_config(&settings.cache);

    let Some(url) = settings.cache_database_url() else {
        return Arc::new(ResultCache::in_memory(ttl));
    };

    match open_cache_db(&url).await {
        Ok(pool) => {
            let backend = Arc::new(SqliteCacheBackend::new(pool, Arc::new(SystemTimeProvider)));
            Arc::new(ResultCache::connect(backend, ttl).await)
        }
        Err(e) => {
            warn!(error = %e, database_url = %url, "Durable cache unavailable, using in-process cache");
            Arc::new(ResultCache::in_memory(ttl))
        }
    }
}

fn build_probes(specs: &HashMap<String, CommandSpec>, env_allowlist: &[String]) -> ProbeRegistry {
    let mut registry = ProbeRegistry::new();
    for (kind, spec) in specs {
        registry.register(
            kind.clone(),
            Arc::new(CommandProbe::new(spec.clone()).with_env_allowlist(env_allowlist.to_vec())),
        );
    }
    registry
}
