// Batch file format (JSON)
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use probeweave_core::domain::{Priority, ProbeParams, ScanTask};
use probeweave_infra_system::CommandSpec;

/// One scan batch.
///
/// Either `tasks` (one parallel batch) or `groups` (executed one group after
/// another) is expected; `tasks` wins when both are present.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BatchFile {
    pub scan_class: Option<String>,
    /// Extra probe definitions; override configured ones with the same kind
    pub probes: HashMap<String, CommandSpec>,
    pub tasks: Vec<TaskSpec>,
    pub groups: Vec<Vec<TaskSpec>>,
}

#[derive(Debug, Deserialize)]
pub struct TaskSpec {
    #[serde(alias = "probe_kind")]
    pub probe: String,
    pub target: String,
    #[serde(default)]
    pub params: ProbeParams,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub priority: Priority,
}

impl TaskSpec {
    pub fn into_task(self) -> ScanTask {
        let task = ScanTask::new(self.probe, self.target)
            .with_params(self.params)
            .with_priority(self.priority);
        match self.timeout_secs {
            Some(secs) => task.with_timeout(Duration::from_secs(secs)),
            None => task,
        }
    }
}

/// Shape of the work in a batch file
pub enum BatchWork {
    Parallel(Vec<ScanTask>),
    Groups(Vec<Vec<ScanTask>>),
}

impl BatchFile {
    pub fn parse(text: &str) -> Result<Self> {
        let batch: BatchFile = serde_json::from_str(text).context("Invalid batch JSON")?;
        if batch.tasks.is_empty() && batch.groups.iter().all(Vec::is_empty) {
            anyhow::bail!("Batch contains no tasks");
        }
        Ok(batch)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {}", path.display()))?;
        Self::parse(&text)
    }

    /// Probe kinds referenced anywhere in the batch
    pub fn probe_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .tasks
            .iter()
            .chain(self.groups.iter().flatten())
            .map(|t| t.probe.clone())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn into_work(self) -> BatchWork {
        if !self.tasks.is_empty() {
            BatchWork::Parallel(self.tasks.into_iter().map(TaskSpec::into_task).collect())
        } else {
            BatchWork::Groups(
                self.groups
                    .into_iter()
                    .map(|g| g.into_iter().map(TaskSpec::into_task).collect())
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probeweave_core::domain::default_timeout;

    #[test]
    fn test_parse_parallel_batch() {
        let batch = BatchFile::parse(
            r#"{
                "scan_class": "quick",
                "tasks": [
                    {"probe": "nmap", "target": "10.0.0.1", "priority": 10},
                    {"probe_kind": "httpx", "target": "example.com",
                     "params": {"ports": "80,443"}, "timeout_secs": 30}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(batch.scan_class.as_deref(), Some("quick"));
        assert_eq!(batch.probe_kinds(), vec!["httpx", "nmap"]);

        let BatchWork::Parallel(tasks) = batch.into_work() else {
            panic!("expected a parallel batch");
        };
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, 10);
        assert_eq!(tasks[0].timeout, default_timeout("nmap"));
        assert_eq!(tasks[1].timeout, Duration::from_secs(30));
        assert_eq!(tasks[1].params["ports"], "80,443");
    }

    #[test]
    fn test_parse_groups_and_probe_overrides() {
        let batch = BatchFile::parse(
            r#"{
                "probes": {"echo": {"command": "echo", "args": ["{target}"]}},
                "groups": [
                    [{"probe": "echo", "target": "a"}],
                    [{"probe": "whois", "target": "b"}]
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(batch.probes["echo"].command, "echo");
        let BatchWork::Groups(groups) = batch.into_work() else {
            panic!("expected groups");
        };
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1][0].probe_kind, "whois");
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(BatchFile::parse(r#"{"tasks": []}"#).is_err());
        assert!(BatchFile::parse("not json").is_err());
    }
}
