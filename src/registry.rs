//! Session key registry
//!
//! Loaded once from `node_registry.json` at startup and read-only afterwards:
//!
//! ```json
//! { "26011B01": { "appskey": "2B7E151628AED2A6ABF7158809CF4F3C" } }
//! ```

use crate::crypto::AppSKey;
use crate::error::KeyLookupError;
use crate::frame::DevAddr;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct NodeEntry {
    #[serde(alias = "appSessionKey", alias = "app_s_key")]
    appskey: String,
}

/// Immutable `DevAddr → AppSKey` mapping
#[derive(Debug, Clone, Default)]
pub struct SessionKeyRegistry {
    keys: HashMap<DevAddr, AppSKey>,
}

impl SessionKeyRegistry {
    pub fn new(keys: HashMap<DevAddr, AppSKey>) -> Self {
        Self { keys }
    }

    /// Load and validate the registry file; any bad entry fails the whole load
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read node registry: {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Failed to parse node registry: {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, NodeEntry> = serde_json::from_str(raw)?;

        let mut keys = HashMap::with_capacity(entries.len());
        for (addr, entry) in entries {
            let dev_addr: DevAddr = addr.parse().map_err(anyhow::Error::msg)?;
            let key: AppSKey = entry
                .appskey
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{} for DevAddr {}", e, dev_addr))?;
            if keys.insert(dev_addr, key).is_some() {
                anyhow::bail!("Duplicate registry entry for DevAddr {}", dev_addr);
            }
        }

        Ok(Self { keys })
    }

    pub fn get(&self, dev_addr: DevAddr) -> Result<&AppSKey, KeyLookupError> {
        self.keys.get(&dev_addr).ok_or(KeyLookupError(dev_addr))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
