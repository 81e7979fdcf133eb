//! HTTP ingestion of bird detections into the web backend
//!
//! Detections are POSTed as JSON to the backend's ingest endpoint, tagged with the
//! field session active at the time of ingest.

use crate::event::DetectionEvent;
use crate::pipeline::UplinkEvent;
use crate::session::SessionSource;
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Backend event type for bird detections
const DETECTION_TYPE: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestPayload {
    #[serde(rename = "type")]
    pub kind: u8,
    pub session_id: String,
    pub node_id: String,
    pub common_name: String,
    pub confidence_level: u8,
    pub time_stamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested,
    /// No active session, nothing sent
    NoSession,
}

/// Client for the backend `/api/ingest` endpoint
pub struct WebIngestor {
    client: reqwest::Client,
    url: String,
    session: SessionSource,
}

impl WebIngestor {
    pub fn new(url: &str, session: SessionSource, timeout_secs: u64) -> Result<Self> {
        info!(url = url, session = ?session, "Creating web ingestor");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            session,
        })
    }

    /// Build the request body for a detection
    pub fn payload(
        session_id: &str,
        uplink: &UplinkEvent,
        detection: &DetectionEvent,
    ) -> IngestPayload {
        IngestPayload {
            kind: DETECTION_TYPE,
            session_id: session_id.to_string(),
            node_id: uplink.devaddr.to_string(),
            common_name: detection.common_name.clone(),
            confidence_level: detection.confidence_bin,
            time_stamp: uplink
                .event_timestamp
                .map(|ts| ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        }
    }

    pub async fn ingest(
        &self,
        uplink: &UplinkEvent,
        detection: &DetectionEvent,
    ) -> Result<IngestOutcome> {
        let session_id = match self.session.resolve().await {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!("No active session, skipping ingest");
                return Ok(IngestOutcome::NoSession);
            }
            Err(e) => {
                warn!(error = %e, "Session lookup failed, skipping ingest");
                return Ok(IngestOutcome::NoSession);
            }
        };
        let payload = Self::payload(&session_id, uplink, detection);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to POST to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Ingest endpoint returned status: {}", status);
        }

        info!(
            session_id = %payload.session_id,
            node_id = %payload.node_id,
            common_name = %payload.common_name,
            "Ingested detection"
        );
        Ok(IngestOutcome::Ingested)
    }
}
