//! InfluxDB 2.x sink for weather and telemetry readings
//!
//! One measurement per metric, a single `value` field, tagged by node and unit:
//!
//! ```text
//! temperature,node=26011B02,unit=celsius value=21
//! ```

use anyhow::{Context, Result};
use influxdb2::models::DataPoint;
use influxdb2::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Upper bound on a single write, so a stalled server cannot hold up the router
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct InfluxDbClient {
    client: Client,
    bucket: String,
    url: String,
    write_timeout: Duration,
}

impl InfluxDbClient {
    pub fn new(url: &str, org: &str, bucket: &str, token: &str) -> Result<Self> {
        info!(url = url, org = org, bucket = bucket, "Creating InfluxDB client");

        let client = Client::new(url, org, token);

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            url: url.trim_end_matches('/').to_string(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.url)
    }

    /// GET `/health`; the influxdb2 crate has no ping of its own
    pub async fn health_check(&self) -> Result<()> {
        let response = reqwest::get(self.health_url())
            .await
            .context("Failed to connect to InfluxDB health endpoint")?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "InfluxDB health check passed");
            Ok(())
        } else {
            anyhow::bail!("InfluxDB health check failed with status: {}", status)
        }
    }

    pub async fn write_point(
        &self,
        measurement: &str,
        field_name: &str,
        field_value: f64,
        tags: Vec<(&str, &str)>,
    ) -> Result<()> {
        let mut point = DataPoint::builder(measurement).field(field_name, field_value);
        for (key, value) in tags {
            point = point.tag(key, value);
        }
        let point = point.build()?;

        let write = self
            .client
            .write(&self.bucket, futures::stream::iter(vec![point]));
        tokio::time::timeout(self.write_timeout, write)
            .await
            .with_context(|| format!("InfluxDB write timed out after {:?}", self.write_timeout))?
            .context("Failed to write data point to InfluxDB")?;

        debug!(
            measurement = measurement,
            field = field_name,
            value = field_value,
            "Wrote data point to InfluxDB"
        );

        Ok(())
    }

    /// Write one node reading
    ///
    /// # Arguments
    /// * `metric` - Measurement name (e.g., "temperature", "alt")
    /// * `value` - Reading
    /// * `node_id` - DevAddr of the reporting node
    /// * `unit` - Optional unit tag (e.g., "celsius", "hpa")
    pub async fn write_sensor(
        &self,
        metric: &str,
        value: f64,
        node_id: &str,
        unit: Option<&str>,
    ) -> Result<()> {
        let mut tags = vec![("node", node_id)];
        if let Some(u) = unit {
            tags.push(("unit", u));
        }

        self.write_point(metric, "value", value, tags).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_influxdb_client_creation() {
        let client =
            InfluxDbClient::new("http://localhost:8086/", "field-lab", "environment", "test-token")
                .unwrap();
        assert_eq!(client.health_url(), "http://localhost:8086/health");
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let client =
            InfluxDbClient::new("http://127.0.0.1:1", "field-lab", "environment", "t").unwrap();
        assert!(client.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_write_times_out_on_stalled_server() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = InfluxDbClient::new(&url, "field-lab", "environment", "t")
            .unwrap()
            .with_write_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            client.write_sensor("temperature", 21.0, "26011B02", Some("celsius")),
        )
        .await
        .expect("write did not honor its timeout");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"), "unexpected error: {err:#}");
    }
}
