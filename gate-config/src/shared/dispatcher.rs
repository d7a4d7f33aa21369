use serde::{Deserialize, Serialize};

/// Where downstream trigger messages are published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherConfig {
    /// Writes one JSON trigger message per line to standard output.
    #[default]
    Stdout,
    /// Emits trigger messages as structured log events.
    Log,
}
