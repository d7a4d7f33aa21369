//! Fallback chains: prioritized sources for one logical data need.

pub mod catalog;
pub mod resolver;
