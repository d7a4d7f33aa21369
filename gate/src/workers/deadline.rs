//! Background worker driving the deadline monitor.
//!
//! Every sweep evaluates open batches, feeds forced decisions back into the completion tracker
//! and republishes trigger messages whose publication failed. A failed or slow sweep is logged
//! and the next one proceeds on schedule.

use std::sync::Arc;
use std::time::Duration;

use gate_config::shared::DeadlineConfig;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::concurrency::shutdown::ShutdownRx;
use crate::deadline::DeadlineMonitor;
use crate::dispatch::base::Dispatcher;
use crate::error::{ErrorKind, GateResult};
use crate::gate_error;
use crate::metrics::{ERROR_KIND_LABEL, GATE_DEADLINE_TICK_FAILURES_TOTAL, GATE_FORCED_TRIGGERS_TOTAL};
use crate::store::base::CompletionStore;
use crate::tracker::CompletionTracker;

/// Summary of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Forced decisions returned by the monitor.
    pub forced: usize,
    /// Forced decisions that published a degraded trigger.
    pub dispatched: usize,
    /// Trigger messages republished from the outbox.
    pub republished: usize,
}

/// Handle to a running deadline worker.
#[derive(Debug)]
pub struct DeadlineWorkerHandle {
    join_handle: JoinHandle<()>,
}

impl DeadlineWorkerHandle {
    /// Waits for the worker to stop.
    pub async fn wait(self) -> GateResult<()> {
        self.join_handle.await.map_err(|err| {
            gate_error!(
                ErrorKind::WorkerPanic,
                "Deadline worker panicked",
                err.to_string(),
                source: err
            )
        })
    }
}

/// Worker running deadline sweeps until shutdown.
#[derive(Debug)]
pub struct DeadlineWorker<S, D> {
    tracker: Arc<CompletionTracker<S, D>>,
    monitor: DeadlineMonitor<S>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    shutdown_rx: ShutdownRx,
}

impl<S, D> DeadlineWorker<S, D>
where
    S: CompletionStore + Clone + Send + Sync + 'static,
    D: Dispatcher + Send + Sync + 'static,
{
    pub fn new(
        tracker: Arc<CompletionTracker<S, D>>,
        clock: Arc<dyn Clock>,
        config: &DeadlineConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let monitor = DeadlineMonitor::new(tracker.store().clone(), config);

        Self {
            tracker,
            monitor,
            clock,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            shutdown_rx,
        }
    }

    /// Starts the worker in a background task.
    pub fn start(self) -> DeadlineWorkerHandle {
        let join_handle = tokio::spawn(self.run());
        DeadlineWorkerHandle { join_handle }
    }

    async fn run(self) {
        let Self {
            tracker,
            monitor,
            clock,
            sweep_interval,
            mut shutdown_rx,
        } = self;

        info!(
            sweep_interval_secs = sweep_interval.as_secs(),
            "starting deadline worker"
        );

        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => {
                    info!("deadline worker shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match timeout(sweep_interval, sweep(&tracker, &monitor, clock.as_ref())).await {
                        Ok(Ok(summary)) => {
                            debug!(?summary, "deadline sweep completed");
                        }
                        Ok(Err(err)) => {
                            counter!(
                                GATE_DEADLINE_TICK_FAILURES_TOTAL,
                                ERROR_KIND_LABEL => format!("{:?}", err.kind())
                            )
                            .increment(1);
                            error!(error = %err, "deadline sweep failed");
                        }
                        Err(_) => {
                            counter!(
                                GATE_DEADLINE_TICK_FAILURES_TOTAL,
                                ERROR_KIND_LABEL => "timeout"
                            )
                            .increment(1);
                            warn!(
                                sweep_interval_secs = sweep_interval.as_secs(),
                                "deadline sweep did not finish within its interval"
                            );
                        }
                    }
                }
            }
        }
    }
}

/// Runs one sweep: applies due forced decisions, then flushes stale triggers.
///
/// A decision that fails to apply is logged and does not stop the others.
pub async fn sweep<S, D>(
    tracker: &CompletionTracker<S, D>,
    monitor: &DeadlineMonitor<S>,
    clock: &dyn Clock,
) -> GateResult<SweepSummary>
where
    S: CompletionStore + Sync,
    D: Dispatcher + Sync,
{
    let decisions = monitor.tick(clock.now()).await?;

    let mut summary = SweepSummary {
        forced: decisions.len(),
        ..SweepSummary::default()
    };

    for decision in &decisions {
        match tracker.apply_forced_decision(decision).await {
            Ok(Some(outcome)) if outcome.dispatched => {
                summary.dispatched += 1;
                counter!(GATE_FORCED_TRIGGERS_TOTAL).increment(1);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    batch_key = %decision.batch_key,
                    error = %err,
                    "forced decision could not be applied"
                );
            }
        }
    }

    summary.republished = tracker.flush_stale_triggers().await?;

    Ok(summary)
}
