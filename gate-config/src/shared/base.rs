use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A numeric or textual field is outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A component requires a Postgres connection that was not configured.
    #[error("`postgres` must be configured when {0}")]
    MissingPostgresConnection(&'static str),
    /// Two stages share a name.
    #[error("stage `{0}` is declared more than once")]
    DuplicateStage(String),
    /// A stage declares no producers.
    #[error("stage `{0}` declares no producers")]
    EmptyStage(String),
    /// Two producers of a stage normalize to the same name.
    #[error("producer `{producer}` is declared more than once in stage `{stage}`")]
    DuplicateProducer { stage: String, producer: String },
    /// A stage references a chain that is not declared.
    #[error("stage `{stage}` references unknown chain `{chain}`")]
    UnknownChainReference { stage: String, chain: String },
    /// Two chains share a name.
    #[error("chain `{0}` is declared more than once")]
    DuplicateChain(String),
    /// A chain declares no sources.
    #[error("chain `{0}` declares no sources")]
    EmptyChain(String),
    /// Two sources of a chain share a name.
    #[error("source `{source_name}` is declared more than once in chain `{chain}`")]
    DuplicateSource { chain: String, source_name: String },
    /// A chain declares more than one primary source.
    #[error("chain `{0}` declares more than one primary source")]
    MultiplePrimarySources(String),
    /// A source is neither backed by a table nor virtual, or is both.
    #[error("source `{source_name}` in chain `{chain}` {reason}")]
    InvalidSourceBacking {
        chain: String,
        source_name: String,
        reason: &'static str,
    },
    /// A virtual source depends on a chain that is not declared.
    #[error("virtual source `{source_name}` in chain `{chain}` depends on unknown chain `{dependency}`")]
    UnknownChainDependency {
        chain: String,
        source_name: String,
        dependency: String,
    },
    /// Chains depend on each other through virtual sources in a cycle.
    #[error("chains {0:?} depend on each other in a cycle")]
    ChainDependencyCycle(Vec<String>),
    /// A table reference is not of the form `schema.table`.
    #[error("`{0}` is not a valid table reference, expected `schema.table`")]
    InvalidTableReference(String),
}
