mod base;
mod chain;
mod connection;
mod coordinator;
mod counting;
mod deadline;
mod dispatcher;
mod season;
mod stage;
mod state_store;
mod table;
mod tracker;
mod validation;

pub use base::*;
pub use chain::*;
pub use connection::*;
pub use coordinator::*;
pub use counting::*;
pub use deadline::*;
pub use dispatcher::*;
pub use season::*;
pub use stage::*;
pub use state_store::*;
pub use table::*;
pub use tracker::*;
pub use validation::*;
