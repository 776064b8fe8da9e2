//! Command line client for the broker-connection multiplexer

use clap::{Parser, Subcommand};
use mqtt_mux::config::MuxConfig;
use mqtt_mux::observability::init_default_logging;
use mqtt_mux::{BrokerKey, HandlerRef, LoggingExecutor, MqttConnector, MqttHandler};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Publish to and subscribe on MQTT brokers over shared mutual-TLS connections
#[derive(Parser)]
#[command(name = "mqtt-mux")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_MUX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message at QoS 2
    Publish {
        /// Broker URI, e.g. ssl://broker.example.com:8883
        #[arg(long)]
        broker: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        message: String,
    },
    /// Subscribe and log every message until Ctrl-C
    Subscribe {
        /// Broker URI, e.g. ssl://broker.example.com:8883
        #[arg(long)]
        broker: String,
        #[arg(long)]
        topic: String,
        /// Handler name reported with each message
        #[arg(long, default_value = "log")]
        handler: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging() {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Publish {
            broker,
            topic,
            message,
        } => run_publish(&config, &broker, &topic, &message).await,
        Commands::Subscribe {
            broker,
            topic,
            handler,
        } => run_subscribe(&config, &broker, &topic, &handler).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<MuxConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(MuxConfig::load_from_file(path)?);
    }

    for path_str in ["mqtt-mux.toml", "config/mqtt-mux.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(MuxConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(MuxConfig::default())
}

fn build_handler(
    config: &MuxConfig,
    broker: &str,
) -> Result<(MqttHandler, BrokerKey), Box<dyn std::error::Error>> {
    let (key, use_tls) = BrokerKey::parse_uri(broker)?;
    let connector = MqttConnector::from_config(config)?;
    if use_tls != connector.uses_tls() {
        warn!(
            "Broker URI {} asks for {} but configuration has TLS {}",
            broker,
            if use_tls { "TLS" } else { "plain TCP" },
            if connector.uses_tls() { "enabled" } else { "disabled" }
        );
    }

    let handler = MqttHandler::new(Arc::new(connector), Arc::new(LoggingExecutor));
    Ok((handler, key))
}

async fn run_publish(
    config: &MuxConfig,
    broker: &str,
    topic: &str,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (handler, key) = build_handler(config, broker)?;
    handler.publish(key.host(), key.port(), topic, message).await?;
    info!("Published {} bytes to {}", message.len(), topic);
    Ok(())
}

async fn run_subscribe(
    config: &MuxConfig,
    broker: &str,
    topic: &str,
    handler_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (handler, key) = build_handler(config, broker)?;
    handler
        .subscribe(key.host(), key.port(), topic, HandlerRef::new(handler_name))
        .await?;

    info!("Listening on {} at {}, press Ctrl-C to stop", topic, key);
    signal::ctrl_c().await?;
    info!("Received Ctrl-C, unsubscribing");

    handler.unsubscribe(key.host(), key.port(), topic).await?;
    Ok(())
}

fn handle_config_command(config: &MuxConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
