//! Completion tracking and trigger gating for staged batch pipelines.
//!
//! Producers report completions for `(stage, logical_date)` batches. The [`tracker`] folds them
//! into persisted state and publishes exactly one trigger per batch once its critical producers
//! are in. The [`deadline`] monitor forces batches that wait too long, and [`validation`]
//! answers, on demand, which stages and data chains actually produced rows for a date.

pub mod chain;
pub mod clock;
pub mod concurrency;
pub mod counting;
pub mod deadline;
pub mod dispatch;
pub mod error;
pub mod expectation;
#[cfg(feature = "failpoints")]
pub mod failpoints;
mod macros;
pub mod metrics;
pub mod policy;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tracker;
pub mod types;
pub mod validation;
pub mod workers;
