//! Shared fixtures for integration and failpoint tests.

pub mod failpoints;
pub mod fixtures;
