use std::collections::HashMap;
use std::sync::Mutex;

use gateway_core::config::{DEFAULT_DEDUPE_CAPACITY, DEFAULT_DEDUPE_TTL_SECS};

/// Bounded LRU+TTL set of `(accountId, chatId, messageId)` keys (spec §4.3.1).
/// Seeing an already-present, non-expired key means the envelope is a
/// duplicate and must be dropped before any side-effecting policy decision.
pub struct DedupeSet {
    capacity: usize,
    ttl_ms: i64,
    seen: Mutex<HashMap<String, i64>>,
}

impl DedupeSet {
    pub fn new(capacity: usize, ttl_ms: i64) -> Self {
        Self {
            capacity,
            ttl_ms,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(account_id: &str, chat_id: &str, message_id: &str) -> String {
        format!("{account_id}:{chat_id}:{message_id}")
    }

    /// Returns `true` if `key` was already seen within the TTL window (and
    /// therefore a duplicate). Otherwise records it and returns `false`.
    pub fn check_and_insert(&self, key: &str, now_ms: i64) -> bool {
        let mut seen = self.seen.lock().unwrap();

        if let Some(&seen_at) = seen.get(key) {
            if now_ms - seen_at <= self.ttl_ms {
                return true;
            }
        }

        if seen.len() >= self.capacity {
            let oldest = seen.iter().min_by_key(|(_, &at)| at).map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                seen.remove(&k);
            }
        }

        seen.insert(key.to_string(), now_ms);
        false
    }

    pub fn cleanup_expired(&self, now_ms: i64) {
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, &mut at| now_ms - at <= self.ttl_ms);
    }
}

impl Default for DedupeSet {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_CAPACITY, DEFAULT_DEDUPE_TTL_SECS * 1_000)
    }
}
