//! Configuration for the gateway ingest service
//!
//! Loads configuration from config.toml with environment variable overrides

use crate::dispatch::{RouteTable, Target};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    pub registry: RegistryConfig,
    pub schema: SchemaConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    pub event_log: Option<EventLogConfig>,
    pub web_ingestor: Option<WebIngestorConfig>,
    pub mqtt: Option<MqttConfig>,
    pub influxdb: Option<InfluxDbConfig>,
    pub outbound: Option<OutboundConfig>,
}

/// UDP listener and pipeline sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind: String,
    pub recv_buffer: usize,
    pub dedup_capacity: usize,
    pub channel_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:1700".to_string(),
            recv_buffer: 4096,
            dedup_capacity: crate::dedup::DEFAULT_CAPACITY,
            channel_capacity: 100,
        }
    }
}

/// Session key registry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub path: String,
}

/// Directory holding structure_protocol.json, event_type_map.json and symbol maps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub dir: String,
}

/// `event_type → target label` overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_target: String,
    pub routes: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_target: Target::LogOnly.label().to_string(),
            routes: HashMap::new(),
        }
    }
}

impl RoutingConfig {
    pub fn route_table(&self) -> RouteTable {
        RouteTable::from_labels(&self.routes, &self.default_target)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    pub dir: String,
}

/// Backend ingest endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebIngestorConfig {
    pub url: String,
    /// Fixed session id; overrides `session_db`
    pub session_id: Option<String>,
    /// Backend SQLite database holding the `sessions` table
    pub session_db: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_url: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub qos: u8,
}

/// InfluxDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

/// Re-encoded events for `send_over_lora`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    pub port: u8,
}

impl Config {
    /// Load configuration from file
    ///
    /// Environment variables override config file values:
    /// - INFLUXDB_TOKEN: InfluxDB token
    /// - INGEST_SESSION_ID: fixed field session for the web ingestor
    /// - INGEST_SESSION_DB: backend database the active session is read from
    /// - MQTT_BROKER_URL: MQTT broker
    pub fn load(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::parse(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let (Some(token), Some(influxdb)) = (lookup("INFLUXDB_TOKEN"), self.influxdb.as_mut()) {
            tracing::info!("Using INFLUXDB_TOKEN from environment");
            influxdb.token = token;
        }

        if let (Some(session), Some(ingestor)) =
            (lookup("INGEST_SESSION_ID"), self.web_ingestor.as_mut())
        {
            tracing::info!(session_id = %session, "Using INGEST_SESSION_ID from environment");
            ingestor.session_id = Some(session);
        }

        if let (Some(path), Some(ingestor)) =
            (lookup("INGEST_SESSION_DB"), self.web_ingestor.as_mut())
        {
            tracing::info!(path = %path, "Using INGEST_SESSION_DB from environment");
            ingestor.session_db = Some(path);
        }

        if let (Some(url), Some(mqtt)) = (lookup("MQTT_BROKER_URL"), self.mqtt.as_mut()) {
            tracing::info!("Using MQTT_BROKER_URL from environment");
            mqtt.broker_url = url;
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.listener
            .bind
            .parse()
            .with_context(|| format!("Invalid listener bind address: {}", self.listener.bind))
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if self.listener.recv_buffer < crate::gwmp::HEADER_LEN {
            anyhow::bail!(
                "Listener recv_buffer must be at least {} bytes",
                crate::gwmp::HEADER_LEN
            );
        }
        if self.listener.channel_capacity == 0 {
            anyhow::bail!("Listener channel_capacity must be greater than 0");
        }
        if self.listener.dedup_capacity == 0 {
            anyhow::bail!("Listener dedup_capacity must be greater than 0");
        }

        for (event_type, label) in self
            .routing
            .routes
            .iter()
            .chain(std::iter::once((&"*".to_string(), &self.routing.default_target)))
        {
            if let Target::Unrecognized(label) = Target::parse(label) {
                tracing::warn!(
                    event_type = %event_type,
                    label = %label,
                    "Unrecognized route label, events will be dropped"
                );
            }
        }

        if let Some(ingestor) = &self.web_ingestor {
            if !is_http_url(&ingestor.url) {
                anyhow::bail!(
                    "Invalid web ingestor URL: {} (must start with http:// or https://)",
                    ingestor.url
                );
            }
            if ingestor.timeout_secs == 0 {
                anyhow::bail!("Web ingestor timeout_secs must be greater than 0");
            }
        }

        if let Some(mqtt) = &self.mqtt {
            if mqtt.qos > 2 {
                anyhow::bail!("Invalid MQTT QoS level: {} (must be 0, 1, or 2)", mqtt.qos);
            }
            if !mqtt.broker_url.starts_with("mqtt://") && !mqtt.broker_url.starts_with("mqtts://")
            {
                anyhow::bail!(
                    "Invalid MQTT broker URL: {} (must start with mqtt:// or mqtts://)",
                    mqtt.broker_url
                );
            }
        }

        if let Some(influxdb) = &self.influxdb {
            if !is_http_url(&influxdb.url) {
                anyhow::bail!(
                    "Invalid InfluxDB URL: {} (must start with http:// or https://)",
                    influxdb.url
                );
            }
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
