// Probeweave Infrastructure - System Adapters
// Implements: ProbeExecutor (subprocess), ToolRegistry (PATH lookup)

pub mod command_probe;
pub mod tool_registry;

pub use command_probe::{CommandProbe, CommandSpec};
pub use tool_registry::{PathToolRegistry, ToolReport};
