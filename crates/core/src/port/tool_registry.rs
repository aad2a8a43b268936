// Tool Registry Port
// Answers "is this tool installed?" for fallback selection

#[cfg(test)]
use mockall::automock;

/// Tool availability lookup
#[cfg_attr(test, automock)]
pub trait ToolRegistry: Send + Sync {
    /// Whether the tool can be run on this host
    fn is_available(&self, tool: &str) -> bool;

    /// Install command for a missing tool, if known
    fn install_hint(&self, tool: &str) -> Option<String>;
}

pub mod mocks {
    use super::*;
    use std::collections::HashSet;

    /// Fixed set of installed tools
    #[derive(Debug, Clone, Default)]
    pub struct StaticToolRegistry {
        installed: HashSet<String>,
    }

    impl StaticToolRegistry {
        pub fn new<I, S>(installed: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                installed: installed.into_iter().map(Into::into).collect(),
            }
        }
    }

    impl ToolRegistry for StaticToolRegistry {
        fn is_available(&self, tool: &str) -> bool {
            self.installed.contains(tool)
        }

        fn install_hint(&self, tool: &str) -> Option<String> {
            Some(format!("install {}", tool))
        }
    }
}
