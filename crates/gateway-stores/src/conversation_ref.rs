use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gateway_core::types::ConversationReference;
use gateway_core::GatewayError;
use serde::{Deserialize, Serialize};

const DEFAULT_CAPACITY: usize = gateway_core::config::DEFAULT_CONVERSATION_REF_CAPACITY;
const DEFAULT_TTL_MS: i64 = gateway_core::config::DEFAULT_CONVERSATION_REF_TTL_DAYS * 24 * 3_600 * 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Document {
    version: u32,
    entries: HashMap<String, ConversationReference>,
}

/// Per-channel LRU+TTL map of conversation references (spec §4.8,
/// `<channel>-conversations.json`), used to initiate proactive outbound
/// messages on webhook-driven channels.
pub struct ConversationRefStore {
    path: PathBuf,
    capacity: usize,
    ttl_ms: i64,
}

impl ConversationRefStore {
    pub fn open(state_dir: &Path, channel: &str) -> Self {
        Self {
            path: state_dir.join(format!("{channel}-conversations.json")),
            capacity: DEFAULT_CAPACITY,
            ttl_ms: DEFAULT_TTL_MS,
        }
    }

    pub fn with_limits(mut self, capacity: usize, ttl_ms: i64) -> Self {
        self.capacity = capacity;
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn get(&self, conversation_id: &str) -> Result<Option<ConversationReference>, GatewayError> {
        let doc: Document = crate::atomic::read_json(&self.path, Document::default())?;
        Ok(doc.entries.get(conversation_id).cloned())
    }

    /// Insert-or-update, stamping `last_seen_at_ms`, then evict expired
    /// entries and trim to capacity by oldest `last_seen_at_ms` (spec §4.8).
    pub fn put(
        &self,
        conversation_id: &str,
        reference: serde_json::Value,
        now_ms: i64,
    ) -> Result<(), GatewayError> {
        let capacity = self.capacity;
        let ttl_ms = self.ttl_ms;
        crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            doc.version = 1;
            doc.entries.insert(
                conversation_id.to_string(),
                ConversationReference {
                    conversation_id: conversation_id.to_string(),
                    reference,
                    last_seen_at_ms: now_ms,
                },
            );

            doc.entries
                .retain(|_, r| now_ms - r.last_seen_at_ms <= ttl_ms);

            while doc.entries.len() > capacity {
                let oldest = doc
                    .entries
                    .iter()
                    .min_by_key(|(_, r)| r.last_seen_at_ms)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(key) => {
                        doc.entries.remove(&key);
                    }
                    None => break,
                }
            }

            doc
        })?;
        Ok(())
    }
}
