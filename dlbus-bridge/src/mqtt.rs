// dlbus-bridge - DL-bus telemetry bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! MQTT publisher.
//!
//! Thin wrapper around the broker client: gated frames go out as retained
//! QoS 0 JSON on the configured topic, and a background task keeps the
//! connection alive, retrying with a fixed backoff when the broker is
//! unreachable. With no broker configured the publisher is disabled and
//! the pipeline keeps running for the HTTP surface alone.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::MqttConfig;

/// Delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors configuring the broker connection.
#[derive(Error, Debug)]
pub enum MqttError {
    /// The connection string is not `host:port`
    #[error("Invalid broker address {0:?} (expected host:port)")]
    InvalidAddress(String),
}

/// Handle to the broker connection.
pub struct MqttPublisher {
    client: Option<AsyncClient>,
    topic: String,
}

impl MqttPublisher {
    /// Connect to the configured broker.
    ///
    /// An empty connection string yields a disabled publisher and no
    /// connection task.
    pub fn connect(config: &MqttConfig) -> Result<(Self, Option<JoinHandle<()>>), MqttError> {
        if config.connection.is_empty() {
            return Ok((
                Self {
                    client: None,
                    topic: config.topic.clone(),
                },
                None,
            ));
        }

        let (host, port) = parse_connection(&config.connection)?;
        let mut options = MqttOptions::new("dlbus-bridge", host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 16);
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => debug!("mqtt broker connected"),
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt connection lost: {err}, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Ok((
            Self {
                client: Some(client),
                topic: config.topic.clone(),
            },
            Some(task),
        ))
    }

    /// Publish one payload, retained at QoS 0.
    ///
    /// Failures are logged, never propagated: the gate has already
    /// advanced its reference, so a lost publication stays lost instead
    /// of piling up behind a dead broker.
    pub async fn publish(&self, payload: Vec<u8>) {
        let Some(client) = &self.client else {
            return;
        };
        debug!("publishing {} bytes to {}", payload.len(), self.topic);
        if let Err(err) = client
            .publish(self.topic.as_str(), QoS::AtMostOnce, true, payload)
            .await
        {
            warn!("mqtt publish failed: {err}");
        }
    }

    /// Whether a broker is configured.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }
}

/// Split a broker address into host and port, tolerating a scheme prefix.
fn parse_connection(connection: &str) -> Result<(String, u16), MqttError> {
    let stripped = connection
        .strip_prefix("mqtt://")
        .or_else(|| connection.strip_prefix("tcp://"))
        .unwrap_or(connection);

    let (host, port) = stripped
        .rsplit_once(':')
        .ok_or_else(|| MqttError::InvalidAddress(connection.to_string()))?;
    if host.is_empty() {
        return Err(MqttError::InvalidAddress(connection.to_string()));
    }
    let port = port
        .parse()
        .map_err(|_| MqttError::InvalidAddress(connection.to_string()))?;

    Ok((host.to_string(), port))
}
