//! echowave: a TCP echo server with CSV telemetry, plus a wave-based
//! load-generation client.
//!
//! Subcommands:
//! - `serve`: echo server; logs every received message to a CSV file and
//!   emits a periodic average-latency summary
//! - `load`: drives waves of 10..100 concurrent clients against a server
//!   and appends per-wave latency statistics to a results CSV

mod client;
mod config;
mod server;
mod stats;
mod telemetry;

use clap::Parser;
use config::{CliArgs, Command, LoadConfig, ServerConfig};
use telemetry::Telemetry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    match cli.command {
        Command::Serve(args) => {
            let config = ServerConfig::resolve(args)?;
            init_logging(&config.log_level);

            info!(
                host = %config.host,
                port = config.port,
                pod = %config.pod_name,
                log_file = %config.log_file.display(),
                latency_file = %config.latency_file.display(),
                "Starting echowave server"
            );

            // Telemetry files must be writable before the listener starts;
            // failure here aborts the process.
            let (telemetry, _tasks) =
                Telemetry::start(&config.log_file, &config.latency_file, config.window).await?;

            let server = server::Server::new(config, telemetry);
            server.run().await?;
        }
        Command::Load(args) => {
            let config = LoadConfig::resolve(args);
            init_logging(&config.log_level);

            info!(
                target = %config.target,
                messages = config.messages_per_client,
                run_id = config.run_id,
                output = %config.output.display(),
                "Starting load test"
            );

            client::run_waves(&config).await?;
        }
    }

    Ok(())
}

/// Initialize tracing. `RUST_LOG` takes precedence over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
