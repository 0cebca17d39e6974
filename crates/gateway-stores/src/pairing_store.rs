use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gateway_core::types::PairingRequest;
use gateway_core::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Document {
    version: u32,
    by_code: HashMap<String, PairingRequest>,
    /// peer_id -> code, so a re-arriving sender's lookup doesn't need a scan.
    peer_index: HashMap<String, String>,
}

/// Per-channel pairing-request store (spec §4.8, `pairing/<channel>.json`).
/// At most one open request per peer id at any time.
pub struct PairingStore {
    path: PathBuf,
}

impl PairingStore {
    pub fn open(state_dir: &Path, channel: &str) -> Self {
        Self {
            path: state_dir.join("pairing").join(format!("{channel}.json")),
        }
    }

    pub fn get_by_peer(&self, peer_id: &str) -> Result<Option<PairingRequest>, GatewayError> {
        let doc: Document = crate::atomic::read_json(&self.path, Document::default())?;
        let code = doc.peer_index.get(peer_id).cloned();
        Ok(code.and_then(|c| doc.by_code.get(&c).cloned()))
    }

    /// Returns the existing request for `peer_id` if one is open, otherwise
    /// persists and returns a freshly built one from `make`. The whole
    /// check-then-insert happens under the store's write lock, so two
    /// concurrent arrivals from the same peer never mint two codes.
    pub fn get_or_create(
        &self,
        peer_id: &str,
        make: impl FnOnce() -> PairingRequest,
    ) -> Result<PairingRequest, GatewayError> {
        let mut created = None;
        let doc = crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            doc.version = 1;
            if let Some(code) = doc.peer_index.get(peer_id) {
                if doc.by_code.contains_key(code) {
                    return doc;
                }
            }
            let request = make();
            created = Some(request.clone());
            doc.peer_index
                .insert(peer_id.to_string(), request.code.clone());
            doc.by_code.insert(request.code.clone(), request);
            doc
        })?;

        if let Some(request) = created {
            return Ok(request);
        }
        let code = doc
            .peer_index
            .get(peer_id)
            .expect("peer_index entry must exist after get_or_create");
        Ok(doc
            .by_code
            .get(code)
            .cloned()
            .expect("by_code entry must exist for indexed peer"))
    }

    /// Approve a code: move it out of the pending set. Idempotent — a second
    /// call for an already-approved code returns `None` (spec invariant 6).
    pub fn approve(&self, code: &str) -> Result<Option<PairingRequest>, GatewayError> {
        let mut removed = None;
        crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            if let Some(request) = doc.by_code.remove(code) {
                doc.peer_index.remove(&request.peer_id);
                removed = Some(request);
            }
            doc
        })?;
        Ok(removed)
    }

    pub fn evict_expired(&self, now_ms: i64, ttl_ms: i64) -> Result<(), GatewayError> {
        crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            let expired: Vec<String> = doc
                .by_code
                .iter()
                .filter(|(_, r)| now_ms - r.created_at_ms > ttl_ms)
                .map(|(code, _)| code.clone())
                .collect();
            for code in expired {
                if let Some(request) = doc.by_code.remove(&code) {
                    doc.peer_index.remove(&request.peer_id);
                }
            }
            doc
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::types::Channel;

    fn req(peer_id: &str, code: &str, created_at_ms: i64) -> PairingRequest {
        PairingRequest {
            channel: Channel::Telegram,
            peer_id: peer_id.to_string(),
            code: code.to_string(),
            created_at_ms,
            meta: HashMap::new(),
        }
    }

    #[test]
    fn get_or_create_is_idempotent_per_peer() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::open(dir.path(), "telegram");

        let first = store.get_or_create("u1", || req("u1", "ABC123", 1)).unwrap();
        let second = store
            .get_or_create("u1", || req("u1", "XYZ999", 2))
            .unwrap();

        assert_eq!(first.code, "ABC123");
        assert_eq!(second.code, "ABC123");
    }

    #[test]
    fn approve_removes_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::open(dir.path(), "telegram");
        store.get_or_create("u1", || req("u1", "ABC123", 1)).unwrap();

        let approved = store.approve("ABC123").unwrap();
        assert!(approved.is_some());
        assert!(store.get_by_peer("u1").unwrap().is_none());

        let second = store.approve("ABC123").unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn evict_expired_removes_stale_requests() {
        let dir = tempfile::tempdir().unwrap();
        let store = PairingStore::open(dir.path(), "telegram");
        store.get_or_create("u1", || req("u1", "ABC123", 0)).unwrap();

        store.evict_expired(100_000, 1_000).unwrap();

        assert!(store.get_by_peer("u1").unwrap().is_none());
    }
}
