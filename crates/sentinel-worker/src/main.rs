//! Sentinel CLI - operator tooling for the coordination primitives.
//!
//! - `check-config`: load, validate and print the effective configuration
//! - `signature`: show how a failure normalizes and which dedup key it gets

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use sentinel_alert::{ErrorDetails, ErrorSignature};
use sentinel_worker::config::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH};
use sentinel_worker::AppConfig;

/// Sentinel coordination layer tooling
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SENTINEL_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Print the normalized message and dedup key for a failure
    Signature {
        #[arg(long)]
        component: String,
        /// Defaults to telemetry.environment from the config
        #[arg(long)]
        environment: Option<String>,
        #[arg(long)]
        step: String,
        #[arg(long = "type")]
        error_type: String,
        #[arg(long)]
        message: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    sentinel_telemetry::init_logging()?;

    // CLI arg > SENTINEL_CONFIG env var > default
    let config = match args.config {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::load()?,
    };
    info!(
        env_var = CONFIG_ENV_VAR,
        default_path = DEFAULT_CONFIG_PATH,
        "Configuration loaded"
    );

    match args.command {
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", config.to_toml()?);
            info!("Configuration valid");
        }
        Command::Signature {
            component,
            environment,
            step,
            error_type,
            message,
        } => {
            let environment = environment.unwrap_or_else(|| config.telemetry.environment.clone());
            let signature = ErrorSignature::new(
                &component,
                &environment,
                &step,
                &ErrorDetails::new(error_type, message),
            );
            println!("normalized: {}", signature.normalized_message);
            println!("dedup_key:  {}", signature.dedup_key());
        }
    }

    Ok(())
}
