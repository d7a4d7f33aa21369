mod batch;
mod event;
mod producer;
mod trigger;

pub use batch::*;
pub use event::*;
pub use producer::*;
pub use trigger::*;
