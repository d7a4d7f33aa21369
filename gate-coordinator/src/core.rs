use std::sync::Arc;

use anyhow::{Context, anyhow};
use gate::chain::catalog::ChainCatalog;
use gate::chain::resolver::ChainResolver;
use gate::clock::{Clock, SystemClock};
use gate::concurrency::shutdown::create_shutdown_channel;
use gate::counting::postgres::PostgresCountingBackend;
use gate::dispatch::base::Dispatcher;
use gate::dispatch::log::LogDispatcher;
use gate::dispatch::stdout::StdoutDispatcher;
use gate::error::{GateError, GateResult};
use gate::expectation::{ExpectationResolver, SeasonCalendar, StageCatalog};
use gate::policy::build_error_handling_policy;
use gate::store::base::CompletionStore;
use gate::store::memory::MemoryCompletionStore;
use gate::store::postgres::PostgresCompletionStore;
use gate::tracker::CompletionTracker;
use gate::types::parse_completion_event;
use gate::validation::report::ValidationReport;
use gate::validation::validator::{ValidationRequest, Validator};
use gate::workers::deadline::DeadlineWorker;
use gate_config::shared::{
    CoordinatorConfig, DispatcherConfig, PgConnectionConfig, StateStoreConfig,
};
use gate_postgres::db::connect_to_database;
use gate_postgres::migrations::apply_gate_migrations;
use sqlx::PgPool;
use tokio::io::{AsyncReadExt, stdin};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::{Command, EXIT_FAILURE, EXIT_RETRY, RecordArgs, ValidateArgs};

/// Builds a tracker for the configured dispatcher and runs `$command` with it.
///
/// Every store and dispatcher combination is monomorphized. This is more verbose than boxing
/// them, but keeps the hot path free of dynamic dispatch.
macro_rules! with_dispatcher {
    ($components:expr, $store:expr, $command:expr) => {
        match $components.config.dispatcher {
            DispatcherConfig::Stdout => {
                let tracker = $components.tracker($store, StdoutDispatcher::new());
                run_tracker_command(&$components, tracker, $command).await
            }
            DispatcherConfig::Log => {
                let tracker = $components.tracker($store, LogDispatcher);
                run_tracker_command(&$components, tracker, $command).await
            }
        }
    };
}

/// Components shared by every command.
struct Components {
    config: CoordinatorConfig,
    resolver: Arc<ExpectationResolver>,
    clock: Arc<dyn Clock>,
}

impl Components {
    fn tracker<S, D>(&self, store: S, dispatcher: D) -> Arc<CompletionTracker<S, D>>
    where
        S: CompletionStore + Sync,
        D: Dispatcher + Sync,
    {
        Arc::new(CompletionTracker::new(
            store,
            dispatcher,
            self.resolver.clone(),
            self.clock.clone(),
            self.config.tracker.clone(),
        ))
    }
}

/// Runs a coordinator command and returns the process exit code.
pub async fn execute(config: CoordinatorConfig, command: Command) -> anyhow::Result<u8> {
    log_config(&config);

    let catalog = Arc::new(StageCatalog::new(&config.stages)?);
    let calendar = SeasonCalendar::new(&config.season);
    let components = Components {
        resolver: Arc::new(ExpectationResolver::new(catalog, calendar)),
        clock: Arc::new(SystemClock),
        config,
    };

    match command {
        Command::Validate(args) => validate(&components, &args).await,
        command => run_with_tracker(components, command).await,
    }
}

async fn run_with_tracker(components: Components, command: Command) -> anyhow::Result<u8> {
    match components.config.state_store {
        StateStoreConfig::Memory => {
            warn!("using the memory state store, completion state is lost when the process exits");
            with_dispatcher!(components, MemoryCompletionStore::new(), command)
        }
        StateStoreConfig::Postgres => {
            let pg_connection = require_postgres(&components.config)?;
            apply_gate_migrations(pg_connection)
                .await
                .context("failed to apply the gate migrations")?;
            let pool = init_pool(pg_connection).await?;

            with_dispatcher!(components, PostgresCompletionStore::new(pool), command)
        }
    }
}

async fn run_tracker_command<S, D>(
    components: &Components,
    tracker: Arc<CompletionTracker<S, D>>,
    command: Command,
) -> anyhow::Result<u8>
where
    S: CompletionStore + Clone + Send + Sync + 'static,
    D: Dispatcher + Send + Sync + 'static,
{
    match command {
        Command::Run => run(components, tracker).await,
        Command::Record(args) => record(tracker, &args).await,
        Command::Validate(_) => Err(anyhow!("validation does not use the completion tracker")),
    }
}

/// Runs the deadline worker until SIGINT or SIGTERM is received.
#[tracing::instrument(skip_all)]
async fn run<S, D>(
    components: &Components,
    tracker: Arc<CompletionTracker<S, D>>,
) -> anyhow::Result<u8>
where
    S: CompletionStore + Clone + Send + Sync + 'static,
    D: Dispatcher + Send + Sync + 'static,
{
    info!("starting coordinator");

    // Triggers decided before a crash may never have been published.
    let republished = tracker.flush_stale_triggers().await?;
    if republished > 0 {
        info!(republished, "republished stale triggers on startup");
    }

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let worker = DeadlineWorker::new(
        tracker,
        components.clock.clone(),
        &components.config.deadline,
        shutdown_rx,
    )
    .start();

    // SIGTERM is what the scheduler sends before killing the process.
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register the SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl+c) received, shutting down coordinator");
        }
        _ = sigterm.recv() => {
            info!("sigterm received, shutting down coordinator");
        }
    }

    shutdown_tx.shutdown();
    worker.wait().await?;

    info!("coordinator stopped");

    Ok(0)
}

/// Records one completion event.
///
/// Exits with [`EXIT_RETRY`] when the failure is transient, so that the message bus redelivers
/// the event, and with [`EXIT_FAILURE`] when redelivering it would fail the same way.
async fn record<S, D>(
    tracker: Arc<CompletionTracker<S, D>>,
    args: &RecordArgs,
) -> anyhow::Result<u8>
where
    S: CompletionStore + Sync,
    D: Dispatcher + Sync,
{
    let payload = match &args.event {
        Some(event) => event.clone().into_bytes(),
        None => {
            let mut payload = Vec::new();
            stdin()
                .read_to_end(&mut payload)
                .await
                .context("failed to read the completion event from stdin")?;
            payload
        }
    };

    let result = match parse_completion_event(&payload) {
        Ok(event) => tracker.record_event(&event).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(outcome) => {
            info!(
                batch = %outcome.state.batch_key,
                fold = ?outcome.fold,
                triggered = outcome.state.triggered,
                dispatched = outcome.dispatched,
                republished = outcome.republished,
                "completion recorded"
            );
            Ok(0)
        }
        Err(err) => Ok(record_exit_code(&err)),
    }
}

/// Validates stage outputs for the requested dates and prints the report.
#[tracing::instrument(skip_all)]
async fn validate(components: &Components, args: &ValidateArgs) -> anyhow::Result<u8> {
    let dates = args
        .date_selection()
        .ok_or_else(|| anyhow!("either --date or both --start and --end are required"))?;

    let pool = init_pool(require_postgres(&components.config)?).await?;
    let counting = PostgresCountingBackend::new(pool, &components.config.counting);
    let chain_catalog = Arc::new(ChainCatalog::new(&components.config.chains)?);
    let chains = ChainResolver::new(
        counting.clone(),
        chain_catalog,
        components.config.validation.default_date_column.clone(),
    );
    let validator = Validator::new(
        components.resolver.clone(),
        chains,
        counting,
        components.config.validation.clone(),
        components.clock.clone(),
    );

    let request = ValidationRequest {
        stages: args.stages.clone(),
        dates,
        mode_override: args.mode.map(Into::into),
    };

    let result = validator.validate(&request).await;
    if let Ok(report) = &result {
        if args.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            print_summary(report);
        }
    }

    Ok(validation_exit_code(&result))
}

/// Maps a validation run to its exit code.
///
/// A request that could not be evaluated, such as an unknown stage or a reversed range, exits
/// with [`EXIT_RETRY`] like any other error. [`EXIT_FAILURE`] only ever means missing data.
fn validation_exit_code(result: &GateResult<ValidationReport>) -> u8 {
    match result {
        Ok(report) => report.exit_code(),
        Err(err) => {
            let policy = build_error_handling_policy(err);
            error!(error = %err, solution = policy.solution(), "validation failed");

            EXIT_RETRY
        }
    }
}

/// Maps a failed `record` to the exit code telling the bus whether to redeliver.
fn record_exit_code(err: &GateError) -> u8 {
    let policy = build_error_handling_policy(err);
    error!(
        error = %err,
        retryable = policy.is_retryable(),
        solution = policy.solution(),
        "completion could not be recorded"
    );

    if policy.is_retryable() {
        EXIT_RETRY
    } else {
        EXIT_FAILURE
    }
}

fn print_summary(report: &ValidationReport) {
    for date in &report.dates {
        println!("{}  progress {:.1}%", date.date, date.progress_percent);
        for phase in &date.phases {
            println!(
                "  {:<12} {:<16} {:>10} rows  ({})",
                phase.stage,
                phase.status.as_str(),
                phase.total_records,
                phase.mode
            );
        }
        for issue in &date.issues {
            let stage = issue.stage.as_deref().unwrap_or("chain");
            println!("  issue   [{stage}] {}: {}", issue.subject, issue.message);
        }
        for warning in &date.warnings {
            let stage = warning.stage.as_deref().unwrap_or("chain");
            println!("  warning [{stage}] {}: {}", warning.subject, warning.message);
        }
    }
    println!("outcome: {:?}", report.outcome);
}

fn require_postgres(config: &CoordinatorConfig) -> anyhow::Result<&PgConnectionConfig> {
    config
        .postgres
        .as_ref()
        .ok_or_else(|| anyhow!("this command needs a `postgres` connection in the configuration"))
}

async fn init_pool(config: &PgConnectionConfig) -> anyhow::Result<PgPool> {
    connect_to_database(config)
        .await
        .context("failed to connect to the gate database")
}

fn log_config(config: &CoordinatorConfig) {
    debug!(
        state_store = ?config.state_store,
        dispatcher = ?config.dispatcher,
        stages = config.stages.len(),
        chains = config.chains.len(),
        metrics_port = config.metrics_port,
        "coordinator config"
    );
    if let Some(pg_connection) = &config.postgres {
        log_pg_connection_config(pg_connection);
    }
    debug!(
        max_commit_attempts = config.tracker.max_commit_attempts,
        initial_backoff_ms = config.tracker.initial_backoff_ms,
        max_backoff_ms = config.tracker.max_backoff_ms,
        trigger_claim_timeout_ms = config.tracker.trigger_claim_timeout_ms,
        "tracker config"
    );
    debug!(
        timeout_secs = config.deadline.timeout_secs,
        sweep_interval_secs = config.deadline.sweep_interval_secs,
        "deadline config"
    );
    debug!(
        season_starts = config.season.season_starts.len(),
        bootstrap_days = config.season.bootstrap_days,
        utc_offset_minutes = config.season.utc_offset_minutes,
        "season config"
    );
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "gate postgres connection config",
    );
}
