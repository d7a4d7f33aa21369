//! Row counting collaborators used during validation.

pub mod base;
pub mod memory;
pub mod postgres;
