//! EnviroPulse gateway ingest
//!
//! Receives Semtech packet forwarder traffic from a LoRaWAN concentrator, decrypts the
//! application payload of each uplink and decodes it into typed environmental events:
//! bird-call detections, weather readings and GPS telemetry.
//!
//! Architecture: UDP listener → pipeline (frame → dedup → AppSKey → codec) → channel →
//! router → event log + ingestor / MQTT / InfluxDB

pub mod codec;
pub mod config;
pub mod confidence;
pub mod crypto;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod event_log;
pub mod frame;
pub mod gwmp;
pub mod influxdb;
pub mod ingestor;
pub mod listener;
pub mod mqtt;
pub mod pipeline;
pub mod registry;
pub mod schema;
pub mod session;
