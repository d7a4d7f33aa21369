//! Metric names and labels emitted by the gate.

/// Label for the stage of a batch.
pub const STAGE_LABEL: &str = "stage";

/// Label for the outcome of a fold or a dispatch.
pub const OUTCOME_LABEL: &str = "outcome";

/// Label for whether a trigger was degraded.
pub const DEGRADED_LABEL: &str = "degraded";

/// Label for whether a trigger was forced by the deadline monitor.
pub const FORCED_LABEL: &str = "forced";

/// Label for the kind of an error.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Label for a counted table.
pub const TABLE_NAME_LABEL: &str = "table_name";

// Completion tracker metrics

/// Counter for completions folded into a batch, labeled by fold outcome.
pub const GATE_COMPLETIONS_RECORDED_TOTAL: &str = "gate_completions_recorded_total";

/// Counter for conditional writes that lost a version race.
pub const GATE_COMMIT_CONFLICTS_TOTAL: &str = "gate_commit_conflicts_total";

/// Counter for events that exhausted their commit attempts.
pub const GATE_COMMIT_ATTEMPTS_EXHAUSTED_TOTAL: &str = "gate_commit_attempts_exhausted_total";

/// Counter for trigger messages published downstream.
pub const GATE_TRIGGERS_DISPATCHED_TOTAL: &str = "gate_triggers_dispatched_total";

/// Counter for trigger publications that failed.
pub const GATE_DISPATCH_FAILURES_TOTAL: &str = "gate_dispatch_failures_total";

// Deadline monitor metrics

/// Counter for degraded triggers forced after the deadline.
pub const GATE_FORCED_TRIGGERS_TOTAL: &str = "gate_forced_triggers_total";

/// Gauge for batches past their deadline that still wait for critical producers.
pub const GATE_BATCHES_AWAITING_CRITICAL: &str = "gate_batches_awaiting_critical";

/// Gauge for batches that have not triggered yet.
pub const GATE_OPEN_BATCHES: &str = "gate_open_batches";

/// Counter for deadline sweeps that failed.
pub const GATE_DEADLINE_TICK_FAILURES_TOTAL: &str = "gate_deadline_tick_failures_total";

// Validation metrics

/// Counter for count queries that did not return a count, labeled by error kind.
pub const GATE_COUNT_QUERY_FAILURES_TOTAL: &str = "gate_count_query_failures_total";
