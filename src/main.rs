//! MQTT Sample - Main Entry Point
//!
//! Connects to the configured broker, subscribes to `sample/+`, publishes a
//! greeting, and ends the session gracefully on SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use mqtt_sample::app::{spawn_signal_listener, SessionLifecycle};
use mqtt_sample::config::{RawConfig, DEFAULT_ENV_FILE};
use mqtt_sample::error::{SampleError, SampleResult};
use mqtt_sample::observability::{init_with_settings, LogSettings};
use mqtt_sample::transport::mqtt::MqttSessionClient;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// Single-session MQTT sample client
#[derive(Parser)]
#[command(name = "mqtt-sample")]
#[command(about = "Getting-started MQTT client with graceful shutdown")]
#[command(version)]
struct Cli {
    /// Env file with MQTT_* settings, layered over the process environment
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe, publish, then wait for a termination signal
    Run,
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_with_settings(LogSettings::from_env().with_verbosity(cli.verbose));

    info!("Starting MQTT sample v{}", env!("CARGO_PKG_VERSION"));

    // A missing default .env is fine; a missing file the user named is not
    let env_file_required = cli.env_file != Path::new(DEFAULT_ENV_FILE);
    let raw_config = match RawConfig::layered(&cli.env_file, env_file_required) {
        Ok(raw_config) => raw_config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_sample(raw_config).await,
        Commands::Config { show } => handle_config_command(&raw_config, show),
    };

    if let Err(e) = result {
        // Startup failures were already logged when they happened
        if !matches!(e, SampleError::Lifecycle(_)) {
            error!("Command failed: {}", e);
        }
        if e.is_fatal() {
            process::exit(1);
        }
    }

    info!("Sample shutdown complete");
}

async fn run_sample(raw_config: RawConfig) -> SampleResult<()> {
    let lifecycle = Arc::new(SessionLifecycle::new(
        raw_config.into_values(),
        MqttSessionClient::new,
    ));

    let signal_listener = spawn_signal_listener(Arc::clone(&lifecycle))?;

    let result = lifecycle.run().await;
    signal_listener.abort();

    Ok(result?)
}

fn handle_config_command(raw_config: &RawConfig, show: bool) -> SampleResult<()> {
    let settings = raw_config.resolve()?;
    info!("Configuration is valid");

    if show {
        println!("{}", toml::to_string_pretty(&settings)?);
    }

    Ok(())
}
