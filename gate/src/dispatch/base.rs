use std::future::Future;

use crate::error::GateResult;
use crate::types::TriggerMessage;

/// Publishes trigger messages downstream.
///
/// Delivery is at least once: a message whose publication failed, or whose outcome is unknown,
/// is published again later. Consumers deduplicate on the message's batch.
pub trait Dispatcher {
    /// Publishes one trigger message.
    ///
    /// Failures should be reported with [`crate::error::ErrorKind::DispatchFailed`].
    fn dispatch(&self, message: &TriggerMessage) -> impl Future<Output = GateResult<()>> + Send;
}
