// dlbus-bridge - DL-bus telemetry bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # dlbus-bridge
//!
//! Daemon that listens to the DL bus of a Technische Alternative heating
//! controller on a GPIO line, decodes the repeating measurement frame and
//! republishes validated readings as retained JSON over MQTT while
//! exposing the latest frame over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the default config path
//! dlbus-bridge
//!
//! # Run with an explicit config and verbose logging
//! dlbus-bridge --config ./bridge.toml --log-level debug
//! ```

mod config;
mod mqtt;
mod web;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dlbus::gate::GateConfig;
use dlbus::pipeline::{Pipeline, PipelineConfig};
use dlbus::source::SourceEvent;

use config::{Config, ConfigError};
use mqtt::{MqttError, MqttPublisher};
use web::AppState;

/// Grace period for the pipeline to drain on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(3);

/// DL-bus telemetry bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "/etc/dlbus/bridge.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,
}

/// Fatal startup errors.
#[derive(Error, Debug)]
enum BridgeError {
    /// Configuration rejected
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The GPIO line could not be acquired
    #[error("Source error: {0}")]
    Source(#[from] dlbus::SourceError),

    /// The broker address is invalid
    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    /// The web listener could not be bound
    #[error("Web service error: {0}")]
    Io(#[from] std::io::Error),

    /// The GPIO backend is not available on this platform
    #[cfg(not(target_os = "linux"))]
    #[error("The GPIO edge source requires Linux")]
    Unsupported,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("cannot load {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    init_tracing(args.log_level.as_deref().unwrap_or(&config.log.level));
    info!("starting {}", web::about());

    match run(config).await {
        Ok(()) => {
            info!("stopped {}", web::about());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing subscriber; `RUST_LOG` wins over the config.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wire the application and run until a shutdown signal arrives.
async fn run(config: Config) -> Result<(), BridgeError> {
    let device = config.device_type()?;

    // Stage A: the edge source.
    let edges = open_edge_source(&config)?;

    // Stages B-D: the decoding pipeline.
    let pipeline_config = PipelineConfig {
        device,
        gate: GateConfig {
            interval: config.heartbeat(),
            delta_kelvin: config.mqtt.delta_kelvin,
        },
        stall_timeout: config.stall_timeout(),
        ..PipelineConfig::default()
    };
    let Pipeline {
        snapshot,
        mut published,
        stats,
        shutdown,
        tasks,
    } = Pipeline::spawn(pipeline_config, edges);

    // The MQTT forwarder drains the gate-approved frames.
    let (publisher, mqtt_task) = MqttPublisher::connect(&config.mqtt)?;
    if !publisher.is_enabled() {
        info!("no mqtt broker configured, publishing disabled");
    }
    let forwarder = tokio::spawn(async move {
        while let Some(frame) = published.recv().await {
            match serde_json::to_vec(&frame) {
                Ok(payload) => publisher.publish(payload).await,
                Err(err) => warn!("cannot serialize frame: {err}"),
            }
        }
    });

    // The HTTP service reads the snapshot slot and the counters.
    let state = Arc::new(AppState {
        snapshot: snapshot.clone(),
        stats: Arc::clone(&stats),
        started: Instant::now(),
    });
    let router = web::router(&config.webserver.services, state);
    let listener = TcpListener::bind(&config.webserver.listen).await?;
    info!("web service listening on {}", config.webserver.listen);
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            error!("web service failed: {err}");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Stop the outer surfaces, then let the pipeline drain downstream
    // within the deadline.
    server.abort();
    if let Some(task) = mqtt_task {
        task.abort();
    }
    let _ = shutdown.send(true);

    let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        for task in tasks {
            let _ = task.await;
        }
        let _ = forwarder.await;
    })
    .await;
    if drained.is_err() {
        warn!("shutdown deadline exceeded, aborting pipeline");
    }

    Ok(())
}

/// Open the platform edge source described by the configuration.
#[cfg(target_os = "linux")]
fn open_edge_source(config: &Config) -> Result<mpsc::Receiver<SourceEvent>, BridgeError> {
    use dlbus::source::{GpioConfig, GpioSource, EDGE_BUFFER_SIZE};

    let gpio = GpioConfig {
        chip: config.dlbus.chip.clone(),
        line: config.dlbus.gpio_line,
        terminator: config.terminator()?,
        debounce: config.debounce(),
        buffer: EDGE_BUFFER_SIZE,
    };
    Ok(GpioSource::open(&gpio)?)
}

#[cfg(not(target_os = "linux"))]
fn open_edge_source(_config: &Config) -> Result<mpsc::Receiver<SourceEvent>, BridgeError> {
    Err(BridgeError::Unsupported)
}
