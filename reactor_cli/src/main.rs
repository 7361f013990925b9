mod cli;
mod error_fmt;
mod service;

use clap::Parser;
use cli::{Cli, Commands, ExperimentCmd, FILE_GUARD, JSON_MODE};
use eyre::{Result, WrapErr};
use reactor_config::{Config, Logging};
use reactor_core::ReactorError;
use std::path::Path;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error hooks: {e}");
    }

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", error_fmt::format_error_json(&err));
        } else {
            eprintln!("{}", error_fmt::humanize(&err));
        }
        tracing::debug!(error = ?err, "exiting with error");
        std::process::exit(error_fmt::exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    let store = service::open_store(&cfg)?;
    if let Some(path) = &cli.calibration {
        service::seed_calibrations(store.as_ref(), path)?;
    }

    match cli.cmd {
        Commands::Run { exit_on_eof } => service::run_service(&cfg, store, exit_on_eof),
        Commands::SelfCheck => service::self_check(&cfg, store.as_ref(), cli.json),
        Commands::Experiment {
            cmd: ExperimentCmd::Activate { file },
        } => {
            service::require_persistent(&cfg, "experiment activate")?;
            let exp = service::activate_experiment(store.as_ref(), &file)?;
            println!("activated experiment {} ({})", exp.id, exp.name);
            Ok(())
        }
        Commands::Calibrate {
            compartment,
            v1,
            ph1,
            v2,
            ph2,
        } => {
            service::require_persistent(&cfg, "calibrate")?;
            let cal = service::calibrate(store.as_ref(), compartment, (v1, ph1), (v2, ph2))?;
            println!(
                "compartment {compartment}: slope {:.5} V/pH, intercept {:.4} V",
                cal.slope, cal.intercept
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ReactorError::Config(format!("read {}: {e}", path.display())))?;
    let cfg = reactor_config::load_toml(&text)
        .map_err(|e| ReactorError::Config(format!("parse {}: {e}", path.display())))?;
    cfg.validate()
        .map_err(|e| ReactorError::Config(e.to_string()))?;
    Ok(cfg)
}

/// Console layer on stderr (stdout carries the bus), plus an optional JSON file layer.
///
/// `RUST_LOG` overrides `--log-level` for the console; `[logging] level` sets the file filter.
fn init_tracing(json: bool, level: &str, logging: &Logging) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| ReactorError::Config(format!("invalid log level {level:?}: {e}")))?;
    let console: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| ReactorError::Config(format!("logging.file {file:?} has no file name")))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "never" => tracing_appender::rolling::never(dir, name),
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                other => {
                    return Err(ReactorError::Config(format!(
                        "logging.rotation must be never|daily|hourly, got {other:?}"
                    ))
                    .into());
                }
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
                .map_err(|e| ReactorError::Config(format!("invalid logging.level: {e}")))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")
}
