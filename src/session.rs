//! Active field session lookup
//!
//! The web backend keeps its sessions in a SQLite database. The newest row, by
//! `p_date`, is the session detections belong to. It is looked up on every ingest so a
//! session started while the gateway runs is picked up without a restart.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};

const LATEST_SESSION_SQL: &str = "SELECT session_id FROM sessions ORDER BY p_date DESC LIMIT 1";

/// Where the ingestor gets its session id from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    /// Fixed id, takes precedence over any database
    Static(String),
    /// Newest row of the backend's `sessions` table
    Database(PathBuf),
    None,
}

impl SessionSource {
    pub fn from_config(session_id: Option<String>, session_db: Option<&str>) -> Self {
        match (session_id, session_db) {
            (Some(id), _) => Self::Static(id),
            (None, Some(path)) => Self::Database(PathBuf::from(path)),
            (None, None) => Self::None,
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Current session id; `Ok(None)` when no session exists
    pub async fn resolve(&self) -> Result<Option<String>> {
        match self {
            Self::Static(id) => Ok(Some(id.clone())),
            Self::None => Ok(None),
            Self::Database(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || latest_session(&path))
                    .await
                    .context("Session lookup task failed")?
            }
        }
    }
}

/// Query the newest session; ids stored as integers come back as decimal strings
pub fn latest_session(path: &Path) -> Result<Option<String>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open session database: {}", path.display()))?;

    let value: Option<Value> = conn
        .query_row(LATEST_SESSION_SQL, [], |row| row.get::<_, Value>(0))
        .optional()
        .with_context(|| format!("Failed to query sessions in {}", path.display()))?;

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(id)) => Ok(Some(id.to_string())),
        Some(Value::Text(id)) => Ok(Some(id)),
        Some(other) => anyhow::bail!("Unsupported session_id type: {:?}", other.data_type()),
    }
}
