// Substitution Table
// Ordered alternative probe kinds per original kind

use std::collections::HashMap;

const BUILTIN: &[(&str, &[&str])] = &[
    // Web scanners
    ("httpx", &["curl", "wget"]),
    ("nuclei", &["nikto", "wpscan"]),
    ("nikto", &["nuclei", "wpscan"]),
    ("dalfox", &["xsser", "xsstrike"]),
    // Directory brute force
    ("gobuster", &["feroxbuster", "ffuf", "dirsearch"]),
    ("feroxbuster", &["gobuster", "ffuf", "dirsearch"]),
    ("ffuf", &["gobuster", "feroxbuster", "dirsearch"]),
    ("dirsearch", &["gobuster", "feroxbuster", "ffuf"]),
    // Subdomain enumeration
    ("subfinder", &["amass", "assetfinder", "sublist3r"]),
    ("amass", &["subfinder", "assetfinder"]),
    // Port scanners
    ("nmap", &["masscan", "rustscan"]),
    ("masscan", &["nmap", "rustscan"]),
    ("rustscan", &["nmap", "masscan"]),
    // SQL injection
    ("sqlmap", &["sqliv", "sqlninja"]),
    // Parameter discovery
    ("arjun", &["paramspider", "x8"]),
    ("paramspider", &["arjun", "x8"]),
    ("x8", &["arjun", "paramspider"]),
    // Crawlers
    ("katana", &["hakrawler", "gospider"]),
    ("hakrawler", &["katana", "gospider"]),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionTable {
    entries: HashMap<String, Vec<String>>,
}

impl SubstitutionTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(kind, alts)| {
                (
                    kind.to_string(),
                    alts.iter().map(|a| a.to_string()).collect(),
                )
            })
            .collect();
        Self { entries }
    }

    /// Add or replace the alternatives of one kind
    pub fn with_entry<I, S>(mut self, kind: impl Into<String>, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.insert(
            kind.into(),
            alternatives.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Layer configured entries over the current ones
    pub fn extend(&mut self, overrides: HashMap<String, Vec<String>>) {
        self.entries.extend(overrides);
    }

    /// Alternatives in preference order (empty if none)
    pub fn alternatives(&self, kind: &str) -> &[String] {
        self.entries.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_alternatives(&self, kind: &str) -> bool {
        !self.alternatives(kind).is_empty()
    }
}
