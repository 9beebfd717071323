//! Moqmon command-line entry point
//!
//! `run` connects the monitor client to the configured broker and streams
//! handler results to the log until interrupted. `config --show` prints the
//! effective configuration.

use clap::{Parser, Subcommand};
use moqmon::client::{spawn_client, DispatchResult};
use moqmon::config::MonitorConfig;
use moqmon::observability::init_default_logging;
use moqmon::transport::RumqttTransport;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Local MQTT broker monitor
#[derive(Parser)]
#[command(name = "moqmon")]
#[command(about = "Self-measuring monitor for a local MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the monitor client to the broker and report measurements
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    info!("Starting moqmon v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_monitor(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<MonitorConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(MonitorConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["moqmon.toml", "config/moqmon.toml"];
            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(MonitorConfig::load_from_file(&path)?);
                }
            }
            error!("No configuration file found; provide one with -c/--config or create moqmon.toml");
            process::exit(1);
        }
    }
}

async fn run_monitor(config: MonitorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let properties = config.to_properties();
    let client_id = config.client.id.clone();

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel::<Vec<DispatchResult>>();
    tokio::spawn(async move {
        while let Some(results) = observer_rx.recv().await {
            for result in results {
                info!(topic = %result.topic, values = %serde_json::Value::Object(result.values),
                    "Measurement");
            }
        }
    });

    let (transport, events) = RumqttTransport::new();
    let (client, join) = spawn_client(
        transport,
        events,
        properties,
        client_id,
        Some(observer_tx),
    )?;

    client.connect();
    info!("Monitor running, press Ctrl-C to stop");

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received");

    client.shutdown();
    if let Err(e) = join.await {
        warn!(error = %e, "Client task ended abnormally");
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, using Ctrl-C only");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

fn handle_config_command(
    config: MonitorConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
