//! Postgres access for the stage completion gate.
//!
//! Holds the row types and queries for the persisted completion state and its trigger outbox,
//! the row counting queries used during validation, and the embedded schema migrations.

pub mod completion;
pub mod counts;
pub mod db;
pub mod migrations;
