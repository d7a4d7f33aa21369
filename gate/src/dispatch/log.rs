use tracing::info;

use crate::dispatch::base::Dispatcher;
use crate::error::GateResult;
use crate::types::TriggerMessage;

/// Dispatcher that only logs trigger messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, message: &TriggerMessage) -> GateResult<()> {
        info!(
            stage = %message.stage_completed,
            logical_date = %message.logical_date,
            correlation_id = %message.correlation_id,
            degraded = message.degraded,
            forced = message.forced,
            completed_producers = ?message.completed_producers,
            missing_producers = ?message.missing_producers,
            "stage trigger published"
        );

        Ok(())
    }
}
