//! Error taxonomy for the ingest pipeline
//!
//! Every per-datagram and per-frame error is caught and logged at the processing
//! boundary. Only socket failures (`TransportError`) are fatal.

use crate::frame::DevAddr;
use thiserror::Error;

/// Malformed gateway envelope or embedded JSON
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("no JSON object found in datagram")]
    NoJson,

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid base64 in rxpk data: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Physical-layer payload that cannot hold a LoRaWAN data frame
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("frame too long: at most {max} bytes, got {actual}")]
    TooLong { max: usize, actual: usize },
}

/// No session key registered for a device address
#[derive(Debug, Error)]
#[error("no AppSKey registered for DevAddr {0}")]
pub struct KeyLookupError(pub DevAddr);

/// Encode/decode failure inside the event codec
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("cannot decode empty payload")]
    EmptyPayload,

    #[error("unknown or unsupported event_type: '{0}'")]
    UnknownEventType(String),

    #[error("unknown event_type code: {0}")]
    UnknownEventCode(u8),

    #[error("incorrect payload length for {event_type}: expected {expected}, got {actual}")]
    LengthMismatch {
        event_type: String,
        expected: usize,
        actual: usize,
    },

    #[error("missing field '{0}' in event")]
    MissingField(String),

    #[error("field '{field}' expects {expected}")]
    TypeMismatch { field: String, expected: &'static str },

    #[error("value {value} for field '{field}' does not fit {wire}")]
    OutOfRange {
        field: String,
        value: String,
        wire: &'static str,
    },

    #[error("{0}")]
    Conversion(String),
}

/// Input outside its defined domain, surfaced to whoever builds the event
#[derive(Debug, Error, PartialEq)]
#[error("{what} out of range: {value}")]
pub struct RangeError {
    pub what: &'static str,
    pub value: f64,
}

/// Malformed schema directory, detected at startup
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("schema '{event_type}': {reason}")]
    Invalid { event_type: String, reason: String },

    #[error("symbol map {path}: {reason}")]
    InvalidMap { path: String, reason: String },
}

/// Socket bind or send failure; the listener cannot recover without a new socket
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send ack to {addr}: {source}")]
    Send {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Per-entry failure in the frame-processing path
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    KeyLookup(#[from] KeyLookupError),
}
