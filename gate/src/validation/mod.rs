//! On-demand validation of stage outputs and chains for dates.

pub mod phase;
pub mod report;
pub mod table;
pub mod validator;
