//! Publication of trigger messages to the next stage.

pub mod base;
pub mod log;
pub mod memory;
pub mod stdout;
