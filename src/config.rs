//! Configuration module for the echowave server and load client.
//!
//! The server supports both command-line arguments and a TOML configuration
//! file. CLI arguments take precedence over config file values. The load
//! client is configured from CLI arguments only.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line interface for echowave
#[derive(Parser, Debug)]
#[command(name = "echowave")]
#[command(author = "echowave authors")]
#[command(version = "0.1.0")]
#[command(about = "TCP echo server with CSV telemetry and a load-test client", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo server
    Serve(ServeArgs),
    /// Run the wave-based load test against a server
    Load(LoadArgs),
}

/// Arguments for the `serve` subcommand
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to the per-message CSV log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Path to the periodic latency-summary CSV file
    #[arg(long)]
    pub latency_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Arguments for the `load` subcommand
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Server IP address
    #[arg(long, default_value = "127.0.0.1")]
    pub ip: String,

    /// Server port
    #[arg(short, long, default_value_t = 12345)]
    pub port: u16,

    /// Number of messages each simulated client sends
    #[arg(short, long, default_value_t = 1)]
    pub messages: u32,

    /// Output CSV file for wave results
    #[arg(short, long, default_value = "full_load_test_results.csv")]
    pub output: PathBuf,

    /// Number of server replicas behind the target (recorded for provenance)
    #[arg(long, default_value_t = 0)]
    pub replicas: u32,

    /// Messages-per-client figure for the current test (recorded for provenance)
    #[arg(long, default_value_t = 0)]
    pub current_test_messages: u32,

    /// Identifier of this test run (recorded for provenance)
    #[arg(long, default_value_t = 0)]
    pub run_id: u32,

    /// Pacing delay between messages within one client, in milliseconds
    #[arg(long, default_value_t = 10)]
    pub pacing_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure for the server
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Telemetry output configuration
#[derive(Debug, Deserialize)]
pub struct TelemetrySection {
    /// Per-message CSV log file
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Periodic latency-summary CSV file
    #[serde(default = "default_latency_file")]
    pub latency_file: PathBuf,
    /// Aggregation window for the latency summary, in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
            latency_file: default_latency_file(),
            window_secs: default_window_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs.csv")
}

fn default_latency_file() -> PathBuf {
    PathBuf::from("latency_server.csv")
}

fn default_window_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub latency_file: PathBuf,
    pub window: Duration,
    pub pod_name: String,
    pub log_level: String,
}

impl ServerConfig {
    /// Resolve server configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values. The pod/instance
    /// identifier comes from the `POD_NAME` environment variable.
    pub fn resolve(args: ServeArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = args.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| "unknown".to_string());

        Ok(ServerConfig {
            host: args.host.unwrap_or(toml_config.server.host),
            port: args.port.unwrap_or(toml_config.server.port),
            log_file: args.log_file.unwrap_or(toml_config.telemetry.log_file),
            latency_file: args
                .latency_file
                .unwrap_or(toml_config.telemetry.latency_file),
            window: Duration::from_secs(toml_config.telemetry.window_secs),
            pod_name,
            log_level: if args.log_level != "info" {
                args.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Final resolved load-client configuration
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub target: String,
    pub messages_per_client: u32,
    pub output: PathBuf,
    pub replicas: u32,
    pub current_test_messages: u32,
    pub run_id: u32,
    pub pacing: Duration,
    pub log_level: String,
}

impl LoadConfig {
    /// Resolve load-client configuration from CLI args.
    pub fn resolve(args: LoadArgs) -> Self {
        LoadConfig {
            target: format!("{}:{}", args.ip, args.port),
            messages_per_client: args.messages,
            output: args.output,
            replicas: args.replicas,
            current_test_messages: args.current_test_messages,
            run_id: args.run_id,
            pacing: Duration::from_millis(args.pacing_ms),
            log_level: args.log_level,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_toml_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.telemetry.log_file, PathBuf::from("logs.csv"));
        assert_eq!(
            config.telemetry.latency_file,
            PathBuf::from("latency_server.csv")
        );
        assert_eq!(config.telemetry.window_secs, 10);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [telemetry]
            log_file = "out/messages.csv"
            latency_file = "out/latency.csv"
            window_secs = 5

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.telemetry.log_file, PathBuf::from("out/messages.csv"));
        assert_eq!(config.telemetry.window_secs, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml_defaults() {
        let args = ServeArgs {
            config: None,
            host: Some("10.0.0.1".to_string()),
            port: Some(8080),
            log_file: None,
            latency_file: None,
            log_level: "info".to_string(),
        };

        let config = ServerConfig::resolve(args).unwrap();
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_file, PathBuf::from("logs.csv"));
        assert_eq!(config.listen_addr(), "10.0.0.1:8080");
    }

    #[test]
    fn test_load_config_resolve() {
        let args = LoadArgs {
            ip: "192.168.1.5".to_string(),
            port: 12345,
            messages: 4,
            output: PathBuf::from("results.csv"),
            replicas: 3,
            current_test_messages: 4,
            run_id: 7,
            pacing_ms: 10,
            log_level: "info".to_string(),
        };

        let config = LoadConfig::resolve(args);
        assert_eq!(config.target, "192.168.1.5:12345");
        assert_eq!(config.messages_per_client, 4);
        assert_eq!(config.pacing, Duration::from_millis(10));
        assert_eq!(config.run_id, 7);
    }
}
