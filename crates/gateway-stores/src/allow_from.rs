use std::collections::HashSet;
use std::path::{Path, PathBuf};

use gateway_core::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Document {
    version: u32,
    peer_ids: HashSet<String>,
}

/// Per-channel persisted set of authorized peer identifiers (spec §4.8,
/// `allow-from/<channel>.json`). Config-file allowlists are unioned with
/// this store's contents at admission time, not merged into it.
pub struct AllowFromStore {
    path: PathBuf,
}

impl AllowFromStore {
    pub fn open(state_dir: &Path, channel: &str) -> Self {
        Self {
            path: state_dir.join("allow-from").join(format!("{channel}.json")),
        }
    }

    pub fn contains(&self, peer_id: &str) -> Result<bool, GatewayError> {
        let doc: Document = crate::atomic::read_json(&self.path, Document::default())?;
        Ok(doc.peer_ids.contains(peer_id))
    }

    pub fn all(&self) -> Result<HashSet<String>, GatewayError> {
        let doc: Document = crate::atomic::read_json(&self.path, Document::default())?;
        Ok(doc.peer_ids)
    }

    /// Add `peer_id` to the store. Idempotent: adding an already-present id
    /// is a no-op.
    pub fn add(&self, peer_id: &str) -> Result<(), GatewayError> {
        crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            doc.version = 1;
            doc.peer_ids.insert(peer_id.to_string());
            doc
        })?;
        Ok(())
    }

    pub fn remove(&self, peer_id: &str) -> Result<(), GatewayError> {
        crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            doc.peer_ids.remove(peer_id);
            doc
        })?;
        Ok(())
    }
}
