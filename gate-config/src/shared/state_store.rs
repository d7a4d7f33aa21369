use serde::{Deserialize, Serialize};

/// Backend persisting completion states and the trigger outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// In-memory store. State is lost on restart, so only suitable for local runs.
    #[default]
    Memory,
    /// Postgres store in the `gate` schema of the configured database.
    Postgres,
}
