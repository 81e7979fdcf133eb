//! Typed event kinds
//!
//! The codec works on loosely-typed [`EventRecord`]s; everything past it sees an
//! [`Event`], so each kind's required fields are checked once, at the boundary.

use crate::codec::{EventRecord, FieldValue};
use crate::confidence::bin_confidence;
use crate::error::{CodecError, RangeError};
use serde::Serialize;

pub const AVIS_EVENT: &str = "avis_event";
pub const WEATHER_EVENT: &str = "weather_event";
pub const TELEMETRY_EVENT: &str = "telemetry_event";
pub const DECODE_ERROR: &str = "decode_error";

/// BirdNET species detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Seconds since epoch (UTC)
    pub timestamp: u32,
    pub common_name: String,
    /// 0-7, see [`bin_confidence`]
    pub confidence_bin: u8,
}

impl DetectionEvent {
    /// Build a detection from a raw 0.0-1.0 confidence score
    pub fn from_score(
        timestamp: u32,
        common_name: impl Into<String>,
        score: f64,
    ) -> Result<Self, RangeError> {
        Ok(Self {
            timestamp,
            common_name: common_name.into(),
            confidence_bin: bin_confidence(score)?,
        })
    }
}

/// Weather sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherEvent {
    pub timestamp: u32,
    /// Whole °C
    pub temperature: i8,
    /// Whole percent relative humidity
    pub humidity: u8,
    /// hPa ×10
    pub pressure: u16,
}

/// GPS fix
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub timestamp: u32,
    pub lat: f32,
    pub lon: f32,
    /// Meters
    pub alt: f32,
}

/// Payload that could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeFailure {
    /// Original bytes, hex encoded
    pub raw: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type")]
pub enum Event {
    #[serde(rename = "avis_event")]
    Detection(DetectionEvent),
    #[serde(rename = "weather_event")]
    Weather(WeatherEvent),
    #[serde(rename = "telemetry_event")]
    Telemetry(TelemetryEvent),
    #[serde(rename = "decode_error")]
    DecodeError(DecodeFailure),
    /// Schema kind with no dedicated struct
    #[serde(untagged)]
    Other(EventRecord),
}

impl Event {
    pub fn decode_error(raw: &[u8], error: &CodecError) -> Self {
        Self::DecodeError(DecodeFailure {
            raw: hex::encode(raw),
            error: error.to_string(),
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::Detection(_) => AVIS_EVENT,
            Self::Weather(_) => WEATHER_EVENT,
            Self::Telemetry(_) => TELEMETRY_EVENT,
            Self::DecodeError(_) => DECODE_ERROR,
            Self::Other(record) => &record.event_type,
        }
    }

    /// Event time in epoch seconds, when the kind carries one
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Detection(e) => Some(e.timestamp as i64),
            Self::Weather(e) => Some(e.timestamp as i64),
            Self::Telemetry(e) => Some(e.timestamp as i64),
            Self::DecodeError(_) => None,
            Self::Other(record) => match record.get("timestamp") {
                Some(FieldValue::Int(ts)) => Some(*ts),
                _ => None,
            },
        }
    }

    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::DecodeError(_))
    }

    /// Schema-level form for encoding; `None` for decode errors
    pub fn to_record(&self) -> Option<EventRecord> {
        let record = match self {
            Self::Detection(e) => EventRecord::new(AVIS_EVENT)
                .with("timestamp", e.timestamp as i64)
                .with("common_name", e.common_name.as_str())
                .with("confidence_bin", e.confidence_bin as i64),
            Self::Weather(e) => EventRecord::new(WEATHER_EVENT)
                .with("timestamp", e.timestamp as i64)
                .with("temperature", e.temperature as i64)
                .with("humidity", e.humidity as i64)
                .with("pressure", e.pressure as i64),
            Self::Telemetry(e) => EventRecord::new(TELEMETRY_EVENT)
                .with("timestamp", e.timestamp as i64)
                .with("lat", e.lat as f64)
                .with("lon", e.lon as f64)
                .with("alt", e.alt as f64),
            Self::DecodeError(_) => return None,
            Self::Other(record) => record.clone(),
        };
        Some(record)
    }

    /// Lift a decoded record into its typed kind
    pub fn from_record(record: EventRecord) -> Result<Self, CodecError> {
        let event = match record.event_type.as_str() {
            AVIS_EVENT => Self::Detection(DetectionEvent {
                timestamp: int_field(&record, "timestamp")?,
                common_name: symbol_field(&record, "common_name")?,
                confidence_bin: int_field(&record, "confidence_bin")?,
            }),
            WEATHER_EVENT => Self::Weather(WeatherEvent {
                timestamp: int_field(&record, "timestamp")?,
                temperature: int_field(&record, "temperature")?,
                humidity: int_field(&record, "humidity")?,
                pressure: int_field(&record, "pressure")?,
            }),
            TELEMETRY_EVENT => Self::Telemetry(TelemetryEvent {
                timestamp: int_field(&record, "timestamp")?,
                lat: float_field(&record, "lat")?,
                lon: float_field(&record, "lon")?,
                alt: float_field(&record, "alt")?,
            }),
            _ => Self::Other(record),
        };
        Ok(event)
    }
}

fn int_field<T: TryFrom<i64>>(record: &EventRecord, name: &str) -> Result<T, CodecError> {
    match record.get(name) {
        Some(FieldValue::Int(v)) => T::try_from(*v).map_err(|_| {
            CodecError::Conversion(format!(
                "{}: field '{}' value {} out of range",
                record.event_type, name, v
            ))
        }),
        Some(_) => Err(CodecError::Conversion(format!(
            "{}: field '{}' is not an integer",
            record.event_type, name
        ))),
        None => Err(CodecError::MissingField(name.to_string())),
    }
}

fn float_field(record: &EventRecord, name: &str) -> Result<f32, CodecError> {
    match record.get(name) {
        Some(FieldValue::Float(v)) => Ok(*v as f32),
        Some(FieldValue::Int(v)) => Ok(*v as f32),
        Some(_) => Err(CodecError::Conversion(format!(
            "{}: field '{}' is not numeric",
            record.event_type, name
        ))),
        None => Err(CodecError::MissingField(name.to_string())),
    }
}

fn symbol_field(record: &EventRecord, name: &str) -> Result<String, CodecError> {
    match record.get(name) {
        Some(FieldValue::Symbol(s)) => Ok(s.clone()),
        Some(_) => Err(CodecError::Conversion(format!(
            "{}: field '{}' is not a symbol",
            record.event_type, name
        ))),
        None => Err(CodecError::MissingField(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_flat_with_event_type() {
        let event = Event::Detection(DetectionEvent {
            timestamp: 10,
            common_name: "American Robin".into(),
            confidence_bin: 3,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event_type": "avis_event",
                "timestamp": 10,
                "common_name": "American Robin",
                "confidence_bin": 3
            })
        );

        let failure = Event::decode_error(&[0xAB], &CodecError::UnknownEventCode(0xAB));
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({
                "event_type": "decode_error",
                "raw": "ab",
                "error": "unknown event_type code: 171"
            })
        );

        let other = Event::Other(EventRecord::new("soil_event").with("moisture", 12_i64));
        assert_eq!(
            serde_json::to_value(&other).unwrap(),
            json!({"event_type": "soil_event", "moisture": 12})
        );
    }

    #[test]
    fn test_from_record_checks_fields() {
        let missing = EventRecord::new(WEATHER_EVENT).with("timestamp", 1_i64);
        assert_eq!(
            Event::from_record(missing),
            Err(CodecError::MissingField("temperature".into()))
        );

        let too_hot = EventRecord::new(WEATHER_EVENT)
            .with("timestamp", 1_i64)
            .with("temperature", 300_i64)
            .with("humidity", 1_i64)
            .with("pressure", 1_i64);
        assert!(matches!(
            Event::from_record(too_hot),
            Err(CodecError::Conversion(_))
        ));
    }

    #[test]
    fn test_timestamp_and_record() {
        let event = Event::Weather(WeatherEvent {
            timestamp: 99,
            temperature: -4,
            humidity: 50,
            pressure: 9990,
        });
        assert_eq!(event.timestamp(), Some(99));
        assert_eq!(event.event_type(), WEATHER_EVENT);
        assert_eq!(Event::from_record(event.to_record().unwrap()).unwrap(), event);

        let failure = Event::decode_error(&[], &CodecError::EmptyPayload);
        assert!(failure.is_decode_error());
        assert!(failure.to_record().is_none());
        assert_eq!(failure.timestamp(), None);
    }

    #[test]
    fn test_detection_from_score() {
        let event = DetectionEvent::from_score(1, "Blue Jay", 0.834).unwrap();
        assert_eq!(event.confidence_bin, 4);
        assert!(DetectionEvent::from_score(1, "Blue Jay", 1.2).is_err());
    }
}
