//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "reactor", version, about = "pH control loop for a three-compartment bioreactor")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/reactor.toml", global = true)]
    pub config: PathBuf,

    /// Seed calibrations from a CSV (strict header) before running the command
    #[arg(long, value_name = "FILE", global = true)]
    pub calibration: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop.
    ///
    /// Commands are read from stdin, one `<topic> <json>` per line; outbound
    /// messages are written to stdout as JSON lines.
    Run {
        /// Stop the loop once stdin is closed
        #[arg(long, action = ArgAction::SetTrue)]
        exit_on_eof: bool,
    },
    /// Check config, store, calibrations and probes, then exit
    SelfCheck,
    /// Manage experiments in the store
    Experiment {
        #[command(subcommand)]
        cmd: ExperimentCmd,
    },
    /// Compute a two-point probe calibration and save it to the store
    Calibrate {
        /// Compartment the probe belongs to
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        compartment: u8,
        /// Probe voltage in the first buffer
        #[arg(long, allow_negative_numbers = true)]
        v1: f64,
        /// pH of the first buffer
        #[arg(long)]
        ph1: f64,
        /// Probe voltage in the second buffer
        #[arg(long, allow_negative_numbers = true)]
        v2: f64,
        /// pH of the second buffer
        #[arg(long)]
        ph2: f64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ExperimentCmd {
    /// Make the experiment in FILE the active one
    Activate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}
