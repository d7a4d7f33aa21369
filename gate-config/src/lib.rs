//! Configuration types and loading for the stage completion gate.
//!
//! The [`shared`] module holds every configuration structure consumed by the coordinator and the
//! `gate` library. [`load`] implements the layered loader used at process start.

pub mod environment;
pub mod load;
pub mod shared;

pub use load::{Config, LoadConfigError, load_config, load_config_from};
