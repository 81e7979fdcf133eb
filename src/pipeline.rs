//! Per-rxpk processing path
//!
//! rxpk → PHYPayload → frame → dedup → AppSKey → plaintext → [`Event`] → [`UplinkEvent`]
//!
//! All shared state lives in [`IngestContext`], built once at startup. The registry and
//! codec are read-only; only the dedup cache needs a lock.

use crate::codec::EventCodec;
use crate::crypto::{decrypt_frm_payload, Direction};
use crate::dedup::Deduplicator;
use crate::dispatch::{RouteTable, Target};
use crate::error::IngestError;
use crate::event::Event;
use crate::frame::{DevAddr, LoRaWanFrame};
use crate::gwmp::{PushDataBody, Rxpk};
use crate::registry::SessionKeyRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// A decoded uplink, ready for routing and logging
#[derive(Debug, Clone, Serialize)]
pub struct UplinkEvent {
    pub received_at: DateTime<Utc>,
    pub devaddr: DevAddr,
    pub fcnt: u16,
    pub fport: u8,
    /// FRMPayload ciphertext, hex
    pub encrypted_frm: String,
    pub mic: String,
    pub decrypted_hex: String,
    pub raw_signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub event: Event,
    pub target: Target,
    /// Gateway radio metadata (freq, rssi, datr, ...) as received
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub radio: Map<String, Value>,
}

/// Shared state for the ingest path
#[derive(Debug)]
pub struct IngestContext {
    registry: SessionKeyRegistry,
    codec: EventCodec,
    routes: RouteTable,
    dedup: Mutex<Deduplicator>,
}

impl IngestContext {
    pub fn new(
        registry: SessionKeyRegistry,
        codec: EventCodec,
        routes: RouteTable,
        dedup_capacity: usize,
    ) -> Self {
        Self {
            registry,
            codec,
            routes,
            dedup: Mutex::new(Deduplicator::new(dedup_capacity)),
        }
    }

    pub fn codec(&self) -> &EventCodec {
        &self.codec
    }

    pub fn registry(&self) -> &SessionKeyRegistry {
        &self.registry
    }

    /// Run every rxpk entry of a PUSH_DATA body; failing entries are logged and skipped
    pub fn process_push_data(&self, body: PushDataBody) -> Vec<UplinkEvent> {
        let received_at = Utc::now();
        let mut events = Vec::with_capacity(body.rxpk.len());

        for (index, entry) in body.rxpk.into_iter().enumerate() {
            match self.process_rxpk(entry, received_at) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(rxpk_index = index, error = %e, "Failed to process rxpk"),
            }
        }

        events
    }

    /// Process one rxpk entry; `Ok(None)` means it was a duplicate
    pub fn process_rxpk(
        &self,
        entry: Value,
        received_at: DateTime<Utc>,
    ) -> Result<Option<UplinkEvent>, IngestError> {
        let rxpk = Rxpk::from_value(entry)?;
        let raw = rxpk.payload()?;
        let frame = LoRaWanFrame::parse(&raw)?;
        let signature = frame.signature();

        let fresh = self
            .dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_and_record(&signature);
        if !fresh {
            debug!(signature = %signature, "Duplicate uplink skipped");
            return Ok(None);
        }

        info!(
            dev_addr = %frame.dev_addr,
            fcnt = frame.fcnt,
            fport = frame.fport,
            frm_payload = %hex::encode(&frame.frm_payload),
            mic = %hex::encode(frame.mic),
            "LoRaWAN uplink received"
        );

        let key = self.registry.get(frame.dev_addr)?;
        let plaintext = decrypt_frm_payload(
            key,
            frame.dev_addr,
            frame.fcnt as u32,
            Direction::Uplink,
            &frame.frm_payload,
        );
        debug!(decrypted = %hex::encode_upper(&plaintext), "Decrypted FRMPayload");

        let event = self.codec.decode(&plaintext);
        let target = self.routes.resolve(event.event_type());
        let event_timestamp = event
            .timestamp()
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

        Ok(Some(UplinkEvent {
            received_at,
            devaddr: frame.dev_addr,
            fcnt: frame.fcnt,
            fport: frame.fport,
            encrypted_frm: hex::encode(&frame.frm_payload),
            mic: hex::encode(frame.mic),
            decrypted_hex: hex::encode_upper(&plaintext),
            raw_signature: signature,
            event_timestamp,
            event,
            target,
            radio: rxpk.metadata,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::{encrypt_frm_payload, AppSKey};
    use crate::error::KeyLookupError;
    use crate::event::DetectionEvent;
    use serde_json::json;
    use std::collections::HashMap;

    pub const KEY: &str = "2B7E151628AED2A6ABF7158809CF4F3C";
    pub const ADDR: DevAddr = DevAddr(0x26011B01);

    pub fn context() -> IngestContext {
        let key: AppSKey = KEY.parse().unwrap();
        IngestContext::new(
            SessionKeyRegistry::new(HashMap::from([(ADDR, key)])),
            EventCodec::new(crate::schema::tests::store()),
            RouteTable::default(),
            4,
        )
    }

    /// Encrypted PHYPayload for `plaintext` as a rxpk JSON entry
    pub fn rxpk_for(dev_addr: DevAddr, fcnt: u16, plaintext: &[u8]) -> Value {
        let key: AppSKey = KEY.parse().unwrap();
        let frame = LoRaWanFrame {
            mhdr: 0x40,
            dev_addr,
            fctrl: 0x00,
            fcnt,
            fport: 1,
            frm_payload: encrypt_frm_payload(&key, dev_addr, fcnt as u32, Direction::Uplink, plaintext),
            mic: [0x11, 0x22, 0x33, 0x44],
        };
        let mut value = serde_json::to_value(Rxpk::new(&frame.to_bytes())).unwrap();
        value["rssi"] = json!(-57);
        value
    }

    const DETECTION: [u8; 8] = [0x01, 0x64, 0x5C, 0x3A, 0x10, 0x03, 0x00, 0x07];

    #[test]
    fn test_process_detection() {
        let ctx = context();
        let uplink = ctx
            .process_rxpk(rxpk_for(ADDR, 5, &DETECTION), Utc::now())
            .unwrap()
            .unwrap();

        assert_eq!(uplink.devaddr, ADDR);
        assert_eq!(uplink.fcnt, 5);
        assert_eq!(uplink.encrypted_frm, "ee25f07b442320f2");
        assert_eq!(uplink.decrypted_hex, "01645C3A10030007");
        assert_eq!(uplink.target, Target::WebIngestor);
        assert_eq!(uplink.radio.get("rssi"), Some(&json!(-57)));
        assert_eq!(
            uplink.event,
            Event::Detection(DetectionEvent {
                timestamp: 0x645C3A10,
                common_name: "Black-capped Chickadee".into(),
                confidence_bin: 7,
            })
        );
        assert_eq!(
            uplink.event_timestamp.unwrap().to_rfc3339(),
            "2023-05-11T00:42:56+00:00"
        );

        let value = serde_json::to_value(&uplink).unwrap();
        assert_eq!(value["event_type"], "avis_event");
        assert_eq!(value["devaddr"], "26011B01");
        assert_eq!(value["target"], "web_ingestor");
        assert_eq!(value["common_name"], "Black-capped Chickadee");
    }

    #[test]
    fn test_record_keys_are_reserved_for_schemas() {
        use crate::codec::EventRecord;
        use crate::schema::{EVENT_TYPE_FIELD, RESERVED_FIELDS};

        let mut radio = Map::new();
        radio.insert("rssi".into(), json!(-80));
        let uplink = UplinkEvent {
            received_at: Utc::now(),
            devaddr: ADDR,
            fcnt: 1,
            fport: 1,
            encrypted_frm: String::new(),
            mic: String::new(),
            decrypted_hex: String::new(),
            raw_signature: String::new(),
            event_timestamp: Some(Utc::now()),
            event: Event::Other(EventRecord::new("soil_event").with("moisture", 41i64)),
            target: Target::LogOnly,
            radio,
        };

        let value = serde_json::to_value(&uplink).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .filter(|k| *k != EVENT_TYPE_FIELD && *k != "moisture")
            .collect();
        keys.sort_unstable();
        let mut reserved = RESERVED_FIELDS.to_vec();
        reserved.sort_unstable();
        assert_eq!(keys, reserved);
    }

    #[test]
    fn test_duplicates_skipped() {
        let ctx = context();
        let entry = rxpk_for(ADDR, 5, &DETECTION);
        assert!(ctx.process_rxpk(entry.clone(), Utc::now()).unwrap().is_some());
        assert!(ctx.process_rxpk(entry, Utc::now()).unwrap().is_none());
        // Next frame counter is a different uplink
        assert!(ctx
            .process_rxpk(rxpk_for(ADDR, 6, &DETECTION), Utc::now())
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_unknown_device_is_key_error() {
        let ctx = context();
        let err = ctx
            .process_rxpk(rxpk_for(DevAddr(0x01020304), 1, &DETECTION), Utc::now())
            .unwrap_err();
        assert!(matches!(err, IngestError::KeyLookup(KeyLookupError(DevAddr(0x01020304)))));
    }

    #[test]
    fn test_bad_payload_becomes_decode_error_event() {
        let ctx = context();
        let uplink = ctx
            .process_rxpk(rxpk_for(ADDR, 9, &[0x01, 0x02]), Utc::now())
            .unwrap()
            .unwrap();
        assert!(uplink.event.is_decode_error());
        assert_eq!(uplink.target, Target::LogOnly);
        assert!(uplink.event_timestamp.is_none());
    }

    #[test]
    fn test_push_data_isolates_entries() {
        let ctx = context();
        let body = PushDataBody {
            rxpk: vec![
                json!({"data": "%%%"}),
                json!({"freq": 868.1}),
                json!({"data": "QAEB"}),
                rxpk_for(DevAddr(0x0A0B0C0D), 1, &DETECTION),
                rxpk_for(ADDR, 7, &DETECTION),
                rxpk_for(ADDR, 7, &DETECTION),
            ],
            stat: None,
        };
        let events = ctx.process_push_data(body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fcnt, 7);
    }
}
