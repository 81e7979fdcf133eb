//! Gateway simulator
//!
//! Plays the concentrator: encodes sample events with the configured schemas, encrypts
//! them with the node's AppSKey and sends them as PUSH_DATA to the ingest service.
//!
//! Usage: gateway-sim [server_addr] [dev_addr] [config.toml]

use anyhow::{Context, Result};
use enviropulse_gateway::codec::EventCodec;
use enviropulse_gateway::config::Config;
use enviropulse_gateway::crypto::{encrypt_frm_payload, Direction};
use enviropulse_gateway::event::{DetectionEvent, Event, TelemetryEvent, WeatherEvent};
use enviropulse_gateway::frame::{DevAddr, LoRaWanFrame};
use enviropulse_gateway::gwmp::{push_data, PacketType, Rxpk};
use enviropulse_gateway::registry::SessionKeyRegistry;
use enviropulse_gateway::schema::SchemaStore;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

const PROTOCOL_VERSION: u8 = 0x02;

/// Fake gateway EUI
const GATEWAY_EUI: [u8; 8] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];

fn scenarios(now: u32) -> Result<Vec<(&'static str, Event)>> {
    Ok(vec![
        (
            "Detection",
            Event::Detection(DetectionEvent::from_score(now, "Black-capped Chickadee", 0.834)?),
        ),
        (
            "Weather",
            Event::Weather(WeatherEvent {
                timestamp: now,
                temperature: 21,
                humidity: 58,
                pressure: 10132,
            }),
        ),
        (
            "Telemetry",
            Event::Telemetry(TelemetryEvent {
                timestamp: now,
                lat: 43.6532,
                lon: -79.3832,
                alt: 76.0,
            }),
        ),
    ])
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let server_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:1700".to_string())
        .parse()
        .context("Invalid server address")?;
    let dev_addr: DevAddr = args
        .next()
        .unwrap_or_else(|| "26011B01".to_string())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let config_path = args.next().unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;
    let registry = SessionKeyRegistry::load(&config.registry.path)?;
    let key = registry.get(dev_addr)?.clone();
    let codec = EventCodec::new(SchemaStore::load_dir(&config.schema.dir)?);

    info!(target_addr = %server_addr, dev_addr = %dev_addr, "Gateway simulator starting");

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let now = chrono::Utc::now().timestamp() as u32;
    let mut token: u16 = 0;

    for (fcnt, (desc, event)) in (1u16..).zip(scenarios(now)?) {
        token = token.wrapping_add(1);

        let plaintext = codec.encode_event(&event);
        if plaintext.is_empty() {
            warn!(scenario = desc, "Event did not encode, skipping");
            continue;
        }

        let frame = LoRaWanFrame {
            mhdr: 0x40,
            dev_addr,
            fctrl: 0x00,
            fcnt,
            fport: 1,
            frm_payload: encrypt_frm_payload(
                &key,
                dev_addr,
                fcnt as u32,
                Direction::Uplink,
                &plaintext,
            ),
            mic: [0x00; 4],
        };
        let mut rxpk = serde_json::to_value(Rxpk::new(&frame.to_bytes()))?;
        rxpk["freq"] = serde_json::json!(904.3);
        rxpk["datr"] = serde_json::json!("SF7BW125");
        rxpk["rssi"] = serde_json::json!(-61);
        rxpk["lsnr"] = serde_json::json!(8.5);
        let json = serde_json::json!({ "rxpk": [rxpk] }).to_string();

        let packet = push_data(PROTOCOL_VERSION, token.to_be_bytes(), &GATEWAY_EUI, &json);
        info!(
            scenario = desc,
            fcnt = fcnt,
            plaintext = %hex::encode_upper(&plaintext),
            size = packet.len(),
            "Sending PUSH_DATA"
        );
        socket.send_to(&packet, server_addr).await?;

        let mut ack_buf = [0u8; 64];
        match tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut ack_buf)).await {
            Ok(Ok((len, from))) if len >= 4 && ack_buf[3] == PacketType::PushAck as u8 => {
                info!(from = %from, token = %hex::encode(&ack_buf[1..3]), "PUSH_ACK received");
            }
            Ok(Ok((len, from))) => warn!(from = %from, len = len, "Unexpected response"),
            Ok(Err(e)) => warn!(error = %e, "Recv error"),
            Err(_) => warn!("No ACK (timeout)"),
        }

        sleep(Duration::from_secs(1)).await;
    }

    info!("Simulation complete");
    Ok(())
}
