//! Tracing and metrics initialization shared by the coordinator and the tests.

pub mod metrics;
pub mod tracing;
