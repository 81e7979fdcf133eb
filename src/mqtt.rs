//! MQTT publisher for environmental readings
//!
//! Weather and telemetry values are published one metric per topic, retained so a
//! dashboard connecting late still sees the latest reading:
//!
//! ```text
//! enviropulse/26011B01/temperature
//! enviropulse/26011B01/pressure
//! enviropulse/26011B02/lat
//! ```

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct MqttClient {
    client: AsyncClient,
    qos: QoS,
    _event_loop_handle: JoinHandle<()>,
}

impl MqttClient {
    /// Create a client and start its event loop
    ///
    /// # Arguments
    /// * `broker_url` - URL like "mqtt://localhost:1883"
    /// * `client_id` - Unique client identifier
    /// * `qos` - Quality of Service level (0, 1, or 2)
    pub async fn new(broker_url: &str, client_id: &str, qos: u8) -> Result<Self> {
        info!(broker = broker_url, client_id = client_id, "Connecting to MQTT broker");

        let (host, port) = parse_broker_url(broker_url)?;
        let qos = qos_from_level(qos)?;

        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, 10);

        let event_loop_handle = tokio::spawn(async move {
            info!("MQTT event loop started");
            loop {
                match event_loop.poll().await {
                    Ok(notification) => {
                        debug!("MQTT notification: {:?}", notification);
                    }
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            qos,
            _event_loop_handle: event_loop_handle,
        })
    }

    /// Queue a publish without waiting; fails when the request queue is full, which is
    /// the case while the broker is unreachable
    pub fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic, self.qos, retain, payload.as_bytes())
            .with_context(|| format!("Failed to publish to topic: {}", topic))?;

        debug!(topic = topic, payload_len = payload.len(), "Published to MQTT");
        Ok(())
    }

    /// Publish one reading of a node
    ///
    /// # Arguments
    /// * `prefix` - Topic prefix (e.g., "enviropulse")
    /// * `node` - DevAddr of the reporting node
    /// * `metric` - Metric name (e.g., "temperature", "lat")
    /// * `value` - Reading as string
    /// * `retain` - Whether to retain the value on the broker
    pub fn publish_sensor(
        &self,
        prefix: &str,
        node: &str,
        metric: &str,
        value: &str,
        retain: bool,
    ) -> Result<()> {
        let topic = Self::build_topic(prefix, node, metric);
        self.publish(&topic, value, retain)
    }

    pub fn build_topic(prefix: &str, node: &str, metric: &str) -> String {
        format!("{}/{}/{}", prefix, node, metric)
    }
}

fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => anyhow::bail!("Invalid MQTT QoS level: {}", other),
    }
}

/// Parse MQTT broker URL into host and port
///
/// Supports:
/// - mqtt://localhost:1883
/// - mqtt://192.168.1.100:1883
/// - mqtts://broker.example.com:8883
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let url_without_protocol = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("mqtts://"))
        .context("Invalid MQTT URL: must start with mqtt:// or mqtts://")?;

    if let Some((host, port_str)) = url_without_protocol.split_once(':') {
        let port = port_str
            .parse::<u16>()
            .context("Invalid port number in MQTT URL")?;
        Ok((host.to_string(), port))
    } else {
        Ok((url_without_protocol.to_string(), 1883))
    }
}
