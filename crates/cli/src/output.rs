// Terminal rendering of results, tool reports, cache stats
use colored::Colorize;
use std::collections::HashMap;
use tabled::{Table, Tabled};

use probeweave_core::application::CacheStats;
use probeweave_core::domain::ScanResult;
use probeweave_infra_system::ToolReport;

#[derive(Tabled)]
struct ResultRow {
    probe: String,
    target: String,
    status: String,
    time: String,
    source: String,
    detail: String,
}

impl ResultRow {
    fn from_result(r: &ScanResult) -> Self {
        let status = if r.success {
            "ok"
        } else if r.timed_out {
            "timeout"
        } else {
            "failed"
        };

        let mut source = if r.from_cache { "cache" } else { "live" }.to_string();
        if r.used_alternative {
            if let Some(alt) = &r.alternative_tool {
                source = format!("{} via {}", source, alt);
            }
        }
        if r.retry_count > 0 {
            source = format!("{} ({} retries)", source, r.retry_count);
        }

        Self {
            probe: r.probe_kind.clone(),
            target: r.target.clone(),
            status: status.to_string(),
            time: format!("{:.2}s", r.execution_time.as_secs_f64()),
            source,
            detail: r.error.clone().unwrap_or_default(),
        }
    }
}

fn sorted(results: &HashMap<String, ScanResult>) -> Vec<&ScanResult> {
    let mut list: Vec<&ScanResult> = results.values().collect();
    list.sort_by(|a, b| a.probe_kind.cmp(&b.probe_kind));
    list
}

pub fn print_results(results: &HashMap<String, ScanResult>) {
    let list = sorted(results);
    let rows: Vec<ResultRow> = list.iter().map(|r| ResultRow::from_result(r)).collect();
    println!("{}", Table::new(rows));

    let succeeded = list.iter().filter(|r| r.success).count();
    let failed = list.len() - succeeded;
    println!();
    if failed == 0 {
        println!("{}", format!("✓ {} probes succeeded", succeeded).green().bold());
    } else {
        println!(
            "{} {}",
            format!("✓ {} succeeded", succeeded).green(),
            format!("✗ {} failed", failed).red().bold()
        );
    }

    for r in list.iter().filter(|r| !r.suggestions.is_empty()) {
        println!();
        println!("{}", format!("Suggestions for {}:", r.probe_kind).yellow().bold());
        for s in &r.suggestions {
            println!("  • {}", s);
        }
    }
}

pub fn print_results_json(results: &HashMap<String, ScanResult>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(results)?);
    Ok(())
}

#[derive(Tabled)]
struct ToolRow {
    tool: String,
    available: String,
    install: String,
}

pub fn print_tool_report(report: &ToolReport) {
    let rows: Vec<ToolRow> = report
        .details
        .iter()
        .map(|(tool, available)| ToolRow {
            tool: tool.clone(),
            available: if *available { "yes" } else { "no" }.to_string(),
            install: report.install_commands.get(tool).cloned().unwrap_or_default(),
        })
        .collect();

    println!("{}", "Tool Availability".cyan().bold());
    println!();
    println!("{}", Table::new(rows));
    println!();
    println!(
        "  {} {}/{} ({:.1}%)",
        "Coverage:".bold(),
        report.available_tools,
        report.total_tools,
        report.coverage_percentage
    );
}

#[derive(Tabled)]
struct KindRow {
    probe: String,
    entries: usize,
}

pub fn print_cache_stats(stats: &CacheStats, degraded: Option<&str>) {
    println!("{}", "Cache Status".cyan().bold());
    println!();
    println!("  {} {}", "Backend:".bold(), stats.backend);
    if let Some(reason) = degraded {
        println!("  {} {}", "Degraded:".bold(), reason.yellow());
    }
    println!("  {} {}", "Total Entries:".bold(), stats.total_entries);
    println!("  {} {}", "Valid Entries:".bold(), stats.valid_entries);

    if !stats.by_kind.is_empty() {
        let rows: Vec<KindRow> = stats
            .by_kind
            .iter()
            .map(|(probe, entries)| KindRow {
                probe: probe.clone(),
                entries: *entries,
            })
            .collect();
        println!();
        println!("{}", Table::new(rows));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probeweave_core::domain::{ProbeOutcome, ScanTask};
    use std::time::Duration;

    #[test]
    fn test_row_marks_cache_alternative_and_retries() {
        let task = ScanTask::new("nmap", "10.0.0.1");
        let mut outcome = ProbeOutcome::success(Default::default());
        outcome.from_cache = true;
        outcome.used_alternative = true;
        outcome.alternative_tool = Some("masscan".to_string());
        outcome.retry_count = 1;

        let row = ResultRow::from_result(&ScanResult::from_outcome(
            &task,
            outcome,
            Duration::from_millis(1500),
        ));
        assert_eq!(row.status, "ok");
        assert_eq!(row.time, "1.50s");
        assert_eq!(row.source, "cache via masscan (1 retries)");
    }

    #[test]
    fn test_row_for_timeout() {
        let task = ScanTask::new("nmap", "10.0.0.1").with_timeout(Duration::from_secs(5));
        let row = ResultRow::from_result(&ScanResult::timed_out(&task));
        assert_eq!(row.status, "timeout");
        assert_eq!(row.detail, "Timeout after 5s");
    }
}
