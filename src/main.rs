//! EnviroPulse gateway ingest service
//!
//! Usage: enviropulse-gateway [config.toml]

use anyhow::{Context, Result};
use enviropulse_gateway::codec::EventCodec;
use enviropulse_gateway::config::Config;
use enviropulse_gateway::dispatch::{OutboundUplink, Router};
use enviropulse_gateway::event_log::EventLog;
use enviropulse_gateway::influxdb::InfluxDbClient;
use enviropulse_gateway::ingestor::WebIngestor;
use enviropulse_gateway::listener::UdpListener;
use enviropulse_gateway::mqtt::MqttClient;
use enviropulse_gateway::pipeline::{IngestContext, UplinkEvent};
use enviropulse_gateway::registry::SessionKeyRegistry;
use enviropulse_gateway::schema::SchemaStore;
use enviropulse_gateway::session::SessionSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Build the router and its configured collaborators
async fn build_router(config: &Config, codec: EventCodec) -> Result<Router> {
    let mut router = Router::new(codec);

    if let Some(log) = &config.event_log {
        router = router.with_event_log(EventLog::new(&log.dir)?);
    }

    if let Some(ingestor) = &config.web_ingestor {
        let session = SessionSource::from_config(
            ingestor.session_id.clone(),
            ingestor.session_db.as_deref(),
        );
        if !session.is_configured() {
            warn!("No ingest session configured, detections will not be ingested");
        }
        router = router.with_ingestor(WebIngestor::new(
            &ingestor.url,
            session,
            ingestor.timeout_secs,
        )?);
    }

    if let Some(mqtt) = &config.mqtt {
        let client = MqttClient::new(&mqtt.broker_url, &mqtt.client_id, mqtt.qos)
            .await
            .context("Failed to create MQTT client")?;
        router = router.with_mqtt(client, mqtt.topic_prefix.clone());
    }

    if let Some(influxdb) = &config.influxdb {
        let client = InfluxDbClient::new(
            &influxdb.url,
            &influxdb.org,
            &influxdb.bucket,
            &influxdb.token,
        )
        .context("Failed to create InfluxDB client")?;
        client
            .health_check()
            .await
            .context("InfluxDB health check failed")?;
        router = router.with_influxdb(client);
    }

    if let Some(outbound) = &config.outbound {
        let (tx, mut rx) = mpsc::channel::<OutboundUplink>(config.listener.channel_capacity);
        tokio::spawn(async move {
            while let Some(uplink) = rx.recv().await {
                info!(command = %uplink.at_command(), "LoRa uplink queued");
            }
        });
        router = router.with_outbound(tx, outbound.port);
    }

    Ok(router)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("EnviroPulse gateway starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;
    info!("Configuration loaded successfully");

    let registry = SessionKeyRegistry::load(&config.registry.path)
        .context("Failed to load node registry")?;
    info!(nodes = registry.len(), "Session key registry loaded");

    let schemas = SchemaStore::load_dir(&config.schema.dir)
        .with_context(|| format!("Failed to load event schemas from {}", config.schema.dir))?;
    info!(event_types = schemas.len(), "Event schemas loaded");

    let codec = EventCodec::new(schemas);
    let context = Arc::new(IngestContext::new(
        registry,
        codec.clone(),
        config.routing.route_table(),
        config.listener.dedup_capacity,
    ));

    let router = build_router(&config, codec).await?;
    let listener = UdpListener::bind(config.bind_addr()?, context, config.listener.recv_buffer)
        .await?;

    let (tx, rx) = mpsc::channel::<UplinkEvent>(config.listener.channel_capacity);
    let shutdown = CancellationToken::new();

    let router_handle = tokio::spawn(router.run(rx));
    let mut listener_handle = tokio::spawn(listener.run(tx, shutdown.clone()));

    info!(bind = %config.listener.bind, "Service running. Press Ctrl+C to stop.");
    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
            shutdown.cancel();
            (&mut listener_handle).await
        }
        result = &mut listener_handle => {
            warn!("Listener task ended unexpectedly");
            result
        }
    };

    // Router drains whatever is still queued
    router_handle.await.ok();

    result.context("Listener task panicked")??;
    info!("EnviroPulse gateway stopped");
    Ok(())
}
