//! Event routing
//!
//! Every decoded uplink carries a [`Target`]. The router appends the uplink to the daily
//! log and then hands it to the matching collaborator. A failure for one uplink is
//! logged and never stops the loop.

use crate::codec::EventCodec;
use crate::event::{Event, AVIS_EVENT, DECODE_ERROR, TELEMETRY_EVENT, WEATHER_EVENT};
use crate::event_log::EventLog;
use crate::influxdb::InfluxDbClient;
use crate::ingestor::{IngestOutcome, WebIngestor};
use crate::mqtt::MqttClient;
use crate::pipeline::UplinkEvent;
use anyhow::Result;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Routing label
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    SendOverLora,
    LogOnly,
    Noop,
    WebIngestor,
    Weather,
    Telemetry,
    Unrecognized(String),
}

impl Target {
    /// Parsing never fails; unknown labels are kept for the diagnostic
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "send_over_lora" => Self::SendOverLora,
            "log_only" => Self::LogOnly,
            "noop" => Self::Noop,
            "web_ingestor" => Self::WebIngestor,
            "weather" => Self::Weather,
            "telemetry" => Self::Telemetry,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::SendOverLora => "send_over_lora",
            Self::LogOnly => "log_only",
            Self::Noop => "noop",
            Self::WebIngestor => "web_ingestor",
            Self::Weather => "weather",
            Self::Telemetry => "telemetry",
            Self::Unrecognized(label) => label,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// `event_type → Target` lookup
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTable {
    routes: HashMap<String, Target>,
    fallback: Target,
}

impl RouteTable {
    pub fn new(routes: HashMap<String, Target>, fallback: Target) -> Self {
        Self { routes, fallback }
    }

    /// Defaults overlaid with configured labels
    pub fn from_labels<'a>(
        labels: impl IntoIterator<Item = (&'a String, &'a String)>,
        fallback: &str,
    ) -> Self {
        let mut table = Self::default();
        for (event_type, label) in labels {
            table.routes.insert(event_type.clone(), Target::parse(label));
        }
        table.fallback = Target::parse(fallback);
        table
    }

    pub fn resolve(&self, event_type: &str) -> Target {
        self.routes
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        let routes = HashMap::from([
            (AVIS_EVENT.to_string(), Target::WebIngestor),
            (WEATHER_EVENT.to_string(), Target::Weather),
            (TELEMETRY_EVENT.to_string(), Target::Telemetry),
            (DECODE_ERROR.to_string(), Target::LogOnly),
        ]);
        Self {
            routes,
            fallback: Target::LogOnly,
        }
    }
}

/// Encoded event waiting for a LoRa transmitter
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundUplink {
    pub port: u8,
    pub payload: Vec<u8>,
}

impl OutboundUplink {
    /// RUI3 AT command that would send this payload
    pub fn at_command(&self) -> String {
        format!("AT+SEND={}:{}", self.port, hex::encode_upper(&self.payload))
    }
}

/// What the router did with an uplink
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Ingested,
    Handled,
    Logged,
    Ignored,
    Queued,
    /// Encoding failed, nothing transmitted
    EncodeFailed,
    /// Target known but its collaborator is not configured or not applicable
    Skipped,
    Unrecognized,
}

/// Dispatches decoded uplinks to their collaborators
pub struct Router {
    codec: EventCodec,
    event_log: Option<EventLog>,
    ingestor: Option<WebIngestor>,
    mqtt: Option<(MqttClient, String)>,
    influxdb: Option<InfluxDbClient>,
    outbound: Option<(mpsc::Sender<OutboundUplink>, u8)>,
}

impl Router {
    pub fn new(codec: EventCodec) -> Self {
        Self {
            codec,
            event_log: None,
            ingestor: None,
            mqtt: None,
            influxdb: None,
            outbound: None,
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    pub fn with_ingestor(mut self, ingestor: WebIngestor) -> Self {
        self.ingestor = Some(ingestor);
        self
    }

    pub fn with_mqtt(mut self, client: MqttClient, topic_prefix: impl Into<String>) -> Self {
        self.mqtt = Some((client, topic_prefix.into()));
        self
    }

    pub fn with_influxdb(mut self, client: InfluxDbClient) -> Self {
        self.influxdb = Some(client);
        self
    }

    pub fn with_outbound(mut self, tx: mpsc::Sender<OutboundUplink>, port: u8) -> Self {
        self.outbound = Some((tx, port));
        self
    }

    /// Consume uplinks until the channel closes
    pub async fn run(self, mut rx: mpsc::Receiver<UplinkEvent>) {
        info!("Starting event router");

        while let Some(uplink) = rx.recv().await {
            if let Err(e) = self.route(&uplink).await {
                error!(
                    dev_addr = %uplink.devaddr,
                    fcnt = uplink.fcnt,
                    route = %uplink.target,
                    error = %e,
                    "Failed to route event"
                );
            }
        }

        info!("Event router stopped");
    }

    /// Log one uplink and deliver it by target
    pub async fn route(&self, uplink: &UplinkEvent) -> Result<Delivery> {
        if let Some(log) = &self.event_log {
            if let Err(e) = log.append(uplink).await {
                error!(error = %e, "Failed to write event log");
            }
        }

        let delivery = match &uplink.target {
            Target::WebIngestor => self.ingest(uplink).await?,
            Target::Weather => match &uplink.event {
                Event::Weather(w) => {
                    info!(
                        dev_addr = %uplink.devaddr,
                        temperature_c = w.temperature,
                        humidity_pct = w.humidity,
                        pressure_hpa = w.pressure as f64 / 10.0,
                        "Weather event"
                    );
                    let node = uplink.devaddr.to_string();
                    self.publish_metrics(
                        &node,
                        &[
                            ("temperature", w.temperature as f64, "celsius"),
                            ("humidity", w.humidity as f64, "percent"),
                            ("pressure", w.pressure as f64 / 10.0, "hpa"),
                        ],
                    )
                    .await;
                    Delivery::Handled
                }
                other => mismatched(&uplink.target, other),
            },
            Target::Telemetry => match &uplink.event {
                Event::Telemetry(t) => {
                    info!(
                        dev_addr = %uplink.devaddr,
                        lat = t.lat,
                        lon = t.lon,
                        alt_m = t.alt,
                        "Telemetry event"
                    );
                    let node = uplink.devaddr.to_string();
                    self.publish_metrics(
                        &node,
                        &[
                            ("latitude", t.lat as f64, "degrees"),
                            ("longitude", t.lon as f64, "degrees"),
                            ("altitude", t.alt as f64, "meters"),
                        ],
                    )
                    .await;
                    Delivery::Handled
                }
                other => mismatched(&uplink.target, other),
            },
            Target::LogOnly => {
                info!(
                    dev_addr = %uplink.devaddr,
                    event_type = uplink.event.event_type(),
                    event = ?uplink.event,
                    "Event"
                );
                Delivery::Logged
            }
            Target::Noop => Delivery::Ignored,
            Target::SendOverLora => self.transmit(&uplink.event).await,
            Target::Unrecognized(label) => {
                warn!(
                    route = %label,
                    event_type = uplink.event.event_type(),
                    "Unknown target, event dropped"
                );
                Delivery::Unrecognized
            }
        };

        Ok(delivery)
    }

    async fn ingest(&self, uplink: &UplinkEvent) -> Result<Delivery> {
        let Event::Detection(detection) = &uplink.event else {
            return Ok(mismatched(&uplink.target, &uplink.event));
        };
        let Some(ingestor) = &self.ingestor else {
            warn!("web_ingestor target but no ingestor configured");
            return Ok(Delivery::Skipped);
        };

        match ingestor.ingest(uplink, detection).await? {
            IngestOutcome::Ingested => Ok(Delivery::Ingested),
            IngestOutcome::NoSession => Ok(Delivery::Skipped),
        }
    }

    async fn transmit(&self, event: &Event) -> Delivery {
        let payload = self.codec.encode_event(event);
        if payload.is_empty() {
            warn!(event_type = event.event_type(), "Encode failed, not transmitting");
            return Delivery::EncodeFailed;
        }

        let Some((tx, port)) = &self.outbound else {
            warn!("send_over_lora target but no transmitter attached");
            return Delivery::Skipped;
        };

        let uplink = OutboundUplink {
            port: *port,
            payload,
        };
        match tx.try_send(uplink) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("LoRa transmitter queue full, payload dropped");
                Delivery::Skipped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("LoRa transmitter queue closed");
                Delivery::Skipped
            }
        }
    }

    /// Fan readings out to MQTT and InfluxDB; a failing sink is logged and skipped
    async fn publish_metrics(&self, node: &str, metrics: &[(&str, f64, &str)]) {
        if let Some((mqtt, prefix)) = &self.mqtt {
            for (metric, value, _) in metrics {
                let published =
                    mqtt.publish_sensor(prefix, node, metric, &value.to_string(), true);
                if let Err(e) = published {
                    warn!(node = node, metric = *metric, error = %e, "MQTT publish skipped");
                }
            }
        }

        if let Some(influxdb) = &self.influxdb {
            for (metric, value, unit) in metrics {
                let written = influxdb.write_sensor(metric, *value, node, Some(*unit)).await;
                if let Err(e) = written {
                    error!(node = node, metric = *metric, error = %e, "InfluxDB write failed");
                    // Remaining points would hit the same outage
                    break;
                }
            }
        }
    }
}

fn mismatched(target: &Target, event: &Event) -> Delivery {
    warn!(
        route = %target,
        event_type = event.event_type(),
        "Event kind not handled by target"
    );
    Delivery::Skipped
}
