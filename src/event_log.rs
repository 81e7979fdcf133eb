//! Append-only daily event log
//!
//! One JSON object per line, one file per UTC day:
//!
//! ```text
//! logs/07_31_2025.jsonl
//! logs/08_01_2025.jsonl
//! ```

use crate::pipeline::UplinkEvent;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct CurrentFile {
    day: NaiveDate,
    file: File,
}

/// Single-writer daily log; the open file rotates when the event day changes
pub struct EventLog {
    dir: PathBuf,
    current: Mutex<Option<CurrentFile>>,
}

impl EventLog {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        info!(dir = %dir.display(), "Event log ready");

        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    /// `MM_DD_YYYY.jsonl` for `day`
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", day.format("%m_%d_%Y")))
    }

    /// Append one uplink to the file for its reception day
    pub async fn append(&self, uplink: &UplinkEvent) -> Result<PathBuf> {
        let day = uplink.received_at.date_naive();
        let mut line = serde_json::to_vec(uplink).context("Failed to serialize event")?;
        line.push(b'\n');

        let mut current = self.current.lock().await;
        if current.as_ref().map(|c| c.day) != Some(day) {
            let path = self.path_for(day);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            debug!(path = %path.display(), "Rotated event log");
            *current = Some(CurrentFile { day, file });
        }

        let path = self.path_for(day);
        if let Some(current) = current.as_mut() {
            current
                .file
                .write_all(&line)
                .await
                .with_context(|| format!("Failed to write log file: {}", path.display()))?;
            current.file.flush().await?;
        }

        Ok(path)
    }
}
