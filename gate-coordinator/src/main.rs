//! Stage-gate coordinator binary.
//!
//! Runs the deadline worker, records single completion events handed over by the message bus,
//! and validates stage outputs for dates. Exit codes are part of the interface: the bus
//! redelivers an event only when `record` exits with [`EXIT_RETRY`].

use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use gate::expectation::ProcessingMode;
use gate::validation::validator::DateSelection;
use gate_telemetry::metrics::init_metrics;
use gate_telemetry::tracing::init_tracing;
use tracing::{error, info};

use crate::config::load_coordinator_config;
use crate::core::execute;

mod config;
mod core;

/// Exit code of a permanently rejected event or an incomplete validation.
pub const EXIT_FAILURE: u8 = 1;

/// Exit code of a transient failure or a validation that could not determine completeness.
pub const EXIT_RETRY: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "gate-coordinator", about = "Completion tracking and stage gating")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the deadline worker until SIGINT or SIGTERM
    Run,
    /// Record one completion event read from `--event` or stdin
    Record(RecordArgs),
    /// Validate stage outputs and chains for a date or a date range
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Completion event as JSON. Read from stdin when omitted
    #[arg(long)]
    pub event: Option<String>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Stage to validate. Repeat for several stages; all stages when omitted
    #[arg(long = "stage")]
    pub stages: Vec<String>,

    /// Single date to validate (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["start", "end"], required_unless_present = "start")]
    pub date: Option<NaiveDate>,

    /// First date of an inclusive range
    #[arg(long, requires = "end")]
    pub start: Option<NaiveDate>,

    /// Last date of an inclusive range
    #[arg(long, requires = "start")]
    pub end: Option<NaiveDate>,

    /// Processing mode to assume instead of deriving it from each date
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

impl ValidateArgs {
    pub fn date_selection(&self) -> Option<DateSelection> {
        match (self.date, self.start, self.end) {
            (Some(date), _, _) => Some(DateSelection::Single(date)),
            (None, Some(start), Some(end)) => Some(DateSelection::Range { start, end }),
            _ => None,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    Historical,
    SameDay,
    Bootstrap,
}

impl From<ModeArg> for ProcessingMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Historical => ProcessingMode::Historical,
            ModeArg::SameDay => ProcessingMode::SameDay,
            ModeArg::Bootstrap => ProcessingMode::Bootstrap,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_coordinator_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(EXIT_RETRY);
        }
    };

    let _log_flusher = match init_tracing(env!("CARGO_BIN_NAME")) {
        Ok(log_flusher) => log_flusher,
        Err(err) => {
            eprintln!("failed to initialize tracing: {err}");
            return ExitCode::from(EXIT_RETRY);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to build the async runtime");
            return ExitCode::from(EXIT_RETRY);
        }
    };

    let result = runtime.block_on(async {
        if let Some(port) = config.metrics_port {
            init_metrics(env!("CARGO_BIN_NAME"), port)?;
            info!(port, "metrics endpoint started");
        }

        execute(config, cli.command).await
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(EXIT_RETRY)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_accepts_a_single_date_or_a_range() {
        let cli = Cli::try_parse_from([
            "gate-coordinator",
            "validate",
            "--stage",
            "raw",
            "--stage",
            "analytics",
            "--date",
            "2025-01-10",
            "--mode",
            "same-day",
        ])
        .unwrap();
        let Command::Validate(args) = cli.command else {
            panic!("expected the validate command");
        };
        assert_eq!(args.stages, vec!["raw", "analytics"]);
        assert!(matches!(args.mode, Some(ModeArg::SameDay)));
        assert!(matches!(
            args.date_selection(),
            Some(DateSelection::Single(date)) if date == NaiveDate::from_ymd_opt(2025, 1, 10).unwrap()
        ));

        let cli = Cli::try_parse_from([
            "gate-coordinator",
            "validate",
            "--start",
            "2025-01-01",
            "--end",
            "2025-01-07",
            "--json",
        ])
        .unwrap();
        let Command::Validate(args) = cli.command else {
            panic!("expected the validate command");
        };
        assert!(args.json);
        assert!(matches!(
            args.date_selection(),
            Some(DateSelection::Range { .. })
        ));
    }

    #[test]
    fn validate_rejects_a_date_mixed_with_a_range() {
        let result = Cli::try_parse_from([
            "gate-coordinator",
            "validate",
            "--date",
            "2025-01-10",
            "--start",
            "2025-01-01",
            "--end",
            "2025-01-07",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from(["gate-coordinator", "validate", "--start", "2025-01-01"]);
        assert!(result.is_err());
    }
}
