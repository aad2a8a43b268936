// Failure Diagnostics
// Text classification of probe failures and per-category suggestions

use crate::domain::ErrorCategory;
use crate::port::ToolRegistry;

/// Pattern groups in match order; the groups overlap ("rate limit"), so order decides
pub const PATTERN_GROUPS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::ToolNotFound,
        &["not found", "command not found", "no such file or directory"],
    ),
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "time limit exceeded"],
    ),
    (
        ErrorCategory::PermissionDenied,
        &["permission denied", "access denied", "operation not permitted"],
    ),
    (
        ErrorCategory::NetworkError,
        &[
            "connection refused",
            "network unreachable",
            "no route to host",
            "name or service not known",
        ],
    ),
    (
        ErrorCategory::WafDetected,
        &["waf", "web application firewall", "blocked by security", "rate limit"],
    ),
    (
        ErrorCategory::RateLimited,
        &["rate limit", "too many requests", "429"],
    ),
];

/// Classify failure text (error message plus stderr), case-insensitively
pub fn classify(text: &str) -> ErrorCategory {
    let text = text.to_lowercase();
    PATTERN_GROUPS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| text.contains(p)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Actionable suggestions for a failed probe
pub fn suggestions(
    category: ErrorCategory,
    tool: &str,
    target: &str,
    tools: &dyn ToolRegistry,
    alternatives: &[String],
) -> Vec<String> {
    match category {
        ErrorCategory::ToolNotFound => {
            let mut out = Vec::new();
            if !tools.is_available(tool) {
                if let Some(hint) = tools.install_hint(tool) {
                    out.push(format!("Install {}: {}", tool, hint));
                }
            }
            if !alternatives.is_empty() {
                out.push(format!("Try alternative tools: {}", alternatives.join(", ")));
            }
            out
        }
        ErrorCategory::Timeout => strings(&[
            "Increase timeout value",
            "Check network connectivity",
            "Use faster scan options",
        ]),
        ErrorCategory::PermissionDenied => vec![
            format!("Run with sudo: sudo {}", tool),
            "Check file permissions".to_string(),
        ],
        ErrorCategory::NetworkError => vec![
            "Check network connectivity".to_string(),
            format!("Verify target is reachable: ping {}", target),
            "Check DNS resolution".to_string(),
        ],
        ErrorCategory::WafDetected => strings(&[
            "Use WAF bypass techniques",
            "Add delay between requests",
            "Use custom user-agent",
            "Consider using tamper scripts",
        ]),
        ErrorCategory::RateLimited => strings(&[
            "Reduce request rate",
            "Add delay between requests",
            "Use proxy rotation",
        ]),
        ErrorCategory::InvalidTarget | ErrorCategory::Unknown => {
            strings(&["Review error logs", "Check tool installation"])
        }
        ErrorCategory::NoExecutor => vec![format!("Register an executor for {}", tool)],
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::tool_registry::MockToolRegistry;

    #[test]
    fn test_classify_each_group() {
        assert_eq!(classify("sh: nmap: command not found"), ErrorCategory::ToolNotFound);
        assert_eq!(classify("Operation TIMED OUT"), ErrorCategory::Timeout);
        assert_eq!(classify("Permission denied"), ErrorCategory::PermissionDenied);
        assert_eq!(classify("connect: Connection refused"), ErrorCategory::NetworkError);
        assert_eq!(classify("blocked by security policy"), ErrorCategory::WafDetected);
        assert_eq!(classify("HTTP 429 Too Many Requests"), ErrorCategory::RateLimited);
        assert_eq!(classify("segfault"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_earlier_group_wins() {
        // "rate limit" appears in both the waf and rate-limited groups
        assert_eq!(classify("rate limit exceeded"), ErrorCategory::WafDetected);
        // "not found" beats timeout
        assert_eq!(classify("host not found after timeout"), ErrorCategory::ToolNotFound);
    }

    #[test]
    fn test_tool_not_found_suggestions() {
        let mut tools = MockToolRegistry::new();
        tools.expect_is_available().return_const(false);
        tools
            .expect_install_hint()
            .returning(|_| Some("apt install nmap".to_string()));

        let alternatives = vec!["masscan".to_string(), "rustscan".to_string()];
        let out = suggestions(ErrorCategory::ToolNotFound, "nmap", "h", &tools, &alternatives);
        assert_eq!(
            out,
            vec![
                "Install nmap: apt install nmap".to_string(),
                "Try alternative tools: masscan, rustscan".to_string(),
            ]
        );
    }

    #[test]
    fn test_installed_tool_gets_no_install_hint() {
        let mut tools = MockToolRegistry::new();
        tools.expect_is_available().return_const(true);

        let out = suggestions(ErrorCategory::ToolNotFound, "nmap", "h", &tools, &[]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_network_suggestion_names_target() {
        let tools = MockToolRegistry::new();
        let out = suggestions(ErrorCategory::NetworkError, "httpx", "10.1.1.1", &tools, &[]);
        assert_eq!(out[1], "Verify target is reachable: ping 10.1.1.1");
    }
}
