//! Forge CLI Binary
//!
//! Command-line interface for the model generation scheduler.

use clap::Parser;
use forge_scheduler::cli::{map_error, Cli, RunContext};
use forge_scheduler::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let context = match RunContext::new(cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    let logging_config = match build_logging_config(&cli, context.config().logging.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!(config = ?context.config_path(), "Forge CLI starting");

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Fold CLI flags over the configured logging section
fn build_logging_config(cli: &Cli, mut config: LoggingConfig) -> anyhow::Result<LoggingConfig> {
    if !cli.verbose && cli.log_level.is_none() {
        config.level = "warn".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.parse()?;
    }
    Ok(config)
}
