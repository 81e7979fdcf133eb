//! UDP in, typed events out: listener + pipeline + router against the shipped schema files

use enviropulse_gateway::codec::{EventCodec, FieldValue};
use enviropulse_gateway::dispatch::{RouteTable, Router};
use enviropulse_gateway::event::{DetectionEvent, Event};
use enviropulse_gateway::event_log::EventLog;
use enviropulse_gateway::listener::UdpListener;
use enviropulse_gateway::pipeline::{IngestContext, UplinkEvent};
use enviropulse_gateway::registry::SessionKeyRegistry;
use enviropulse_gateway::schema::SchemaStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REGISTRY: &str = r#"{"26011B01": {"appskey": "2B7E151628AED2A6ABF7158809CF4F3C"}}"#;

/// DevAddr 26011B01, FCnt 5, FPort 1, encrypted `01 64 5C 3A 10 03 00 07`, MIC 11223344
const DETECTION_PHY: &str = "QAEbASYABQAB7iXwe0QjIPIRIjNE";

const EUI: [u8; 8] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];

fn codec() -> EventCodec {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("protocol");
    EventCodec::new(SchemaStore::load_dir(dir).unwrap())
}

fn push_data(token: [u8; 2], phy_b64: &str) -> Vec<u8> {
    let json = format!(
        r#"{{"rxpk":[{{"tmst":3512348611,"freq":904.3,"rssi":-57,"lsnr":9.2,"datr":"SF7BW125","data":"{}"}}]}}"#,
        phy_b64
    );
    enviropulse_gateway::gwmp::push_data(0x02, token, &EUI, &json)
}

struct Harness {
    addr: SocketAddr,
    gateway: UdpSocket,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), enviropulse_gateway::error::TransportError>>,
}

async fn start(tx: mpsc::Sender<UplinkEvent>) -> Harness {
    let context = IngestContext::new(
        SessionKeyRegistry::from_json(REGISTRY).unwrap(),
        codec(),
        RouteTable::default(),
        16,
    );
    let listener = UdpListener::bind("127.0.0.1:0".parse().unwrap(), Arc::new(context), 4096)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(listener.run(tx, shutdown.clone()));

    Harness {
        addr,
        gateway: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        shutdown,
        handle,
    }
}

async fn recv_ack(gateway: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(1), gateway.recv_from(&mut buf))
        .await
        .expect("no ack")
        .unwrap();
    buf[..len].to_vec()
}

#[tokio::test]
async fn test_push_data_detection_end_to_end() {
    let (tx, mut rx) = mpsc::channel(8);
    let harness = start(tx).await;

    harness
        .gateway
        .send_to(&push_data([0xAB, 0xCD], DETECTION_PHY), harness.addr)
        .await
        .unwrap();

    assert_eq!(recv_ack(&harness.gateway).await, vec![0x02, 0xAB, 0xCD, 0x01]);

    let uplink = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uplink.devaddr.to_string(), "26011B01");
    assert_eq!(uplink.fcnt, 5);
    assert_eq!(uplink.decrypted_hex, "01645C3A10030007");
    assert_eq!(uplink.mic, "11223344");
    assert_eq!(
        uplink.event,
        Event::Detection(DetectionEvent {
            timestamp: 0x645C3A10,
            common_name: "Black-capped Chickadee".into(),
            confidence_bin: 7,
        })
    );
    assert_eq!(uplink.radio["rssi"], -57);

    // Taxonomy code 0x0300 behind the mapped name
    let codec = codec();
    let record = codec
        .try_decode(&[0x01, 0x64, 0x5C, 0x3A, 0x10, 0x03, 0x00, 0x07])
        .unwrap();
    assert_eq!(
        record.get("common_name"),
        Some(&FieldValue::Symbol("Black-capped Chickadee".into()))
    );
    let taxonomy = codec
        .schemas()
        .get("avis_event")
        .and_then(|schema| schema.field("common_name"))
        .and_then(|field| field.map.clone())
        .unwrap();
    assert_eq!(taxonomy.encode("Black-capped Chickadee"), 0x0300);

    harness.shutdown.cancel();
    assert!(harness.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_retransmitted_push_data_is_acked_but_deduplicated() {
    let (tx, mut rx) = mpsc::channel(8);
    let harness = start(tx).await;

    for token in [[0x00, 0x01], [0x00, 0x02]] {
        harness
            .gateway
            .send_to(&push_data(token, DETECTION_PHY), harness.addr)
            .await
            .unwrap();
        assert_eq!(recv_ack(&harness.gateway).await, vec![0x02, token[0], token[1], 0x01]);
    }

    assert!(rx.recv().await.is_some());
    harness.shutdown.cancel();
    assert!(harness.handle.await.unwrap().is_ok());
    // Listener dropped its sender, so only the first copy ever arrived
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_unknown_device_and_pull_data() {
    let (tx, mut rx) = mpsc::channel(8);
    let harness = start(tx).await;

    // Same frame for DevAddr 0A0B0C0D, which has no key
    let unknown = "QA0MCwoABQAB7iXwe0QjIPIRIjNE";
    harness
        .gateway
        .send_to(&push_data([0x10, 0x20], unknown), harness.addr)
        .await
        .unwrap();
    assert_eq!(recv_ack(&harness.gateway).await, vec![0x02, 0x10, 0x20, 0x01]);

    harness
        .gateway
        .send_to(&[0x02, 0x77, 0x88, 0x02], harness.addr)
        .await
        .unwrap();
    assert_eq!(recv_ack(&harness.gateway).await, vec![0x02, 0x77, 0x88, 0x04]);

    harness.shutdown.cancel();
    assert!(harness.handle.await.unwrap().is_ok());
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_router_writes_daily_log() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel(8);
    let harness = start(tx).await;

    let router = Router::new(codec()).with_event_log(EventLog::new(dir.path()).unwrap());
    let router_handle = tokio::spawn(router.run(rx));

    harness
        .gateway
        .send_to(&push_data([0xAB, 0xCD], DETECTION_PHY), harness.addr)
        .await
        .unwrap();
    recv_ack(&harness.gateway).await;

    // Give the listener time to hand the uplink over before stopping it
    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.shutdown.cancel();
    harness.handle.await.unwrap().unwrap();
    router_handle.await.unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].extension().is_some_and(|ext| ext == "jsonl"));

    let line: serde_json::Value =
        serde_json::from_str(std::fs::read_to_string(&files[0]).unwrap().trim()).unwrap();
    assert_eq!(line["event_type"], "avis_event");
    assert_eq!(line["devaddr"], "26011B01");
    assert_eq!(line["common_name"], "Black-capped Chickadee");
    assert_eq!(line["target"], "web_ingestor");
    assert_eq!(line["event_timestamp"], "2023-05-11T00:42:56Z");
}
