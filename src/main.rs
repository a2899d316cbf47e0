use std::sync::mpsc;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, warn};

use varta_telemetry::config::Config;
use varta_telemetry::{
    JsonFileStore, LogSink, MqttPublisher, Pipeline, PipelineSettings, ReplayClient, StateStore, TelemetrySink,
};

/// Battery telemetry bridge - Publishes home battery readings and derived metrics
#[derive(Parser)]
#[command(name = "varta-telemetry")]
#[command(version)]
#[command(about = "Battery telemetry bridge - Publishes home battery readings and derived metrics", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration first (to get log level)
    let config_path = cli.config;
    let config = Config::from_file(&config_path)?;

    let app_log_level = config.default.log_level.as_str();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("varta_telemetry={}", app_log_level).parse()?)
                .add_directive("rumqttc=warn".parse()?),
        )
        .init();

    info!("Configuration loaded from: {}", config_path);
    info!("Log level: {}", config.default.log_level);
    debug!("Configuration: {:?}", config);

    let settings = PipelineSettings::from(&config);
    info!("  Replay directory: {}", config.device.replay_dir.display());
    info!("  Primary interval: {:?}", settings.primary_interval);
    if settings.secondary_enabled {
        info!("  Secondary interval: {:?}", settings.secondary_interval);
    }
    info!("  State file: {}", config.state.path.display());

    let client = Arc::new(ReplayClient::new(&config.device.replay_dir));
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(&config.state.path));

    let mqtt = match &config.mqtt {
        Some(mqtt_config) => {
            info!("Creating MQTT publisher...");
            let publisher = Arc::new(MqttPublisher::new(mqtt_config)?);
            publisher.publish_online_status(true)?;
            publisher.publish_catalog()?;
            info!("MQTT publisher ready under {}/{}", mqtt_config.root, mqtt_config.device_id);
            Some(publisher)
        }
        None => None,
    };
    let sink: Arc<dyn TelemetrySink> = match &mqtt {
        Some(publisher) => publisher.clone(),
        None => {
            info!("No [mqtt] section, writing telemetry to the log");
            Arc::new(LogSink)
        }
    };

    let pipeline = Pipeline::start(client, store, sink, &settings)?;
    info!("Pipeline running, press Ctrl-C to stop");

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;
    let _ = shutdown_rx.recv();

    info!("Shutting down...");
    pipeline.stop();
    if let Some(publisher) = mqtt {
        if let Err(e) = publisher.shutdown() {
            warn!("Failed to close MQTT connection: {}", e);
        }
    }

    Ok(())
}
