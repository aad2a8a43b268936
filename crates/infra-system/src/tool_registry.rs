// PATH-based tool availability (ToolRegistry implementation)
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use probeweave_core::port::ToolRegistry;

/// Install commands for known tools
const INSTALL_COMMANDS: &[(&str, &str)] = &[
    // Go tools
    ("dalfox", "go install github.com/hahwul/dalfox/v2@latest"),
    ("subfinder", "go install -v github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest"),
    ("nuclei", "go install -v github.com/projectdiscovery/nuclei/v3/cmd/nuclei@latest"),
    ("httpx", "go install -v github.com/projectdiscovery/httpx/cmd/httpx@latest"),
    ("katana", "go install github.com/projectdiscovery/katana/cmd/katana@latest"),
    ("gau", "go install github.com/lc/gau/v2/cmd/gau@latest"),
    ("waybackurls", "go install github.com/tomnomnom/waybackurls@latest"),
    ("amass", "go install -v github.com/owasp-amass/amass/v4/...@master"),
    ("ffuf", "go install github.com/ffuf/ffuf/v2@latest"),
    // Python / Ruby tools
    ("arjun", "pip3 install arjun"),
    ("sqlmap", "sudo apt install sqlmap -y"),
    ("wpscan", "sudo gem install wpscan"),
    // Distribution packages
    ("nmap", "sudo apt install nmap -y"),
    ("nikto", "sudo apt install nikto -y"),
    ("gobuster", "sudo apt install gobuster -y"),
    ("masscan", "sudo apt install masscan -y"),
    ("hydra", "sudo apt install hydra -y"),
    ("john", "sudo apt install john -y"),
    ("hashcat", "sudo apt install hashcat -y"),
    ("metasploit-framework", "sudo apt install metasploit-framework -y"),
    ("feroxbuster", "sudo apt install feroxbuster -y"),
    ("dirsearch", "sudo apt install dirsearch -y"),
    ("whatweb", "sudo apt install whatweb -y"),
    ("testssl", "sudo apt install testssl.sh -y"),
    ("sslscan", "sudo apt install sslscan -y"),
];

/// Names whose binary differs from the tool name
const ALIASES: &[(&str, &str)] = &[("testssl.sh", "testssl")];

/// Availability report over a set of tools
#[derive(Debug, Clone, Serialize)]
pub struct ToolReport {
    pub total_tools: usize,
    pub available_tools: usize,
    pub missing_tools: Vec<String>,
    pub coverage_percentage: f64,
    pub details: BTreeMap<String, bool>,
    pub install_commands: BTreeMap<String, String>,
}

impl ToolReport {
    /// Shell script installing every missing tool, or `None` if nothing is missing
    pub fn install_script(&self) -> Option<String> {
        if self.missing_tools.is_empty() {
            return None;
        }
        let mut script = String::from("#!/bin/bash\nset -e\n\n");
        for tool in &self.missing_tools {
            if let Some(cmd) = self.install_commands.get(tool) {
                script.push_str(&format!("echo \"Installing {}...\"\n{}\n\n", tool, cmd));
            }
        }
        Some(script)
    }
}

/// Looks tools up on PATH, memoizing every answer
pub struct PathToolRegistry {
    search_path: Option<OsString>,
    install_commands: HashMap<String, String>,
    aliases: HashMap<String, String>,
    memo: Mutex<HashMap<String, bool>>,
}

impl PathToolRegistry {
    pub fn new() -> Self {
        Self {
            search_path: None,
            install_commands: INSTALL_COMMANDS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            aliases: ALIASES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Search these directories instead of the process PATH
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn with_install_command(mut self, tool: impl Into<String>, command: impl Into<String>) -> Self {
        self.install_commands.insert(tool.into(), command.into());
        self
    }

    /// Tools with a known install command, sorted
    pub fn known_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.install_commands.keys().cloned().collect();
        tools.sort();
        tools
    }

    fn binary_name<'a>(&'a self, tool: &'a str) -> &'a str {
        let name = self.aliases.get(tool).map(String::as_str).unwrap_or(tool);
        name.rsplit('/').next().unwrap_or(name)
    }

    fn lookup(&self, binary: &str) -> bool {
        match &self.search_path {
            Some(path) => match std::env::current_dir() {
                Ok(cwd) => which::which_in(binary, Some(path), cwd).is_ok(),
                Err(_) => false,
            },
            None => which::which(binary).is_ok(),
        }
    }

    pub fn availability_report(&self, tools: &[String]) -> ToolReport {
        let details: BTreeMap<String, bool> = tools
            .iter()
            .map(|tool| (tool.clone(), self.is_available(tool)))
            .collect();
        let missing_tools: Vec<String> = details
            .iter()
            .filter(|(_, available)| !**available)
            .map(|(tool, _)| tool.clone())
            .collect();
        let install_commands = missing_tools
            .iter()
            .filter_map(|tool| self.install_hint(tool).map(|cmd| (tool.clone(), cmd)))
            .collect();

        let total_tools = details.len();
        let available_tools = total_tools - missing_tools.len();
        let coverage_percentage = if total_tools == 0 {
            0.0
        } else {
            (available_tools as f64 / total_tools as f64 * 10_000.0).round() / 100.0
        };

        ToolReport {
            total_tools,
            available_tools,
            missing_tools,
            coverage_percentage,
            details,
            install_commands,
        }
    }

    /// Report over every tool with a known install command
    pub fn system_report(&self) -> ToolReport {
        self.availability_report(&self.known_tools())
    }
}

impl Default for PathToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry for PathToolRegistry {
    fn is_available(&self, tool: &str) -> bool {
        let binary = self.binary_name(tool);
        if let Some(known) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(binary)
        {
            return *known;
        }

        let available = self.lookup(binary);
        debug!(tool, binary, available, "Checked tool availability");
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(binary.to_string(), available);
        available
    }

    fn install_hint(&self, tool: &str) -> Option<String> {
        let key = self.aliases.get(tool).map(String::as_str).unwrap_or(tool);
        Some(
            self.install_commands
                .get(key)
                .cloned()
                .unwrap_or_else(|| format!("apt search {}", tool)),
        )
    }
}
