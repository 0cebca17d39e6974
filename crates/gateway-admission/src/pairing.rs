use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use gateway_core::types::{Channel, PairingRequest};
use gateway_core::GatewayError;
use gateway_stores::PairingStore;

/// Unambiguous alphabet for pairing codes: excludes `0`/`O` and `1`/`I`
/// (spec §4.4).
const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
const CODE_LENGTH: usize = 8;

const PAIRING_INSTRUCTIONS: &str =
    "Ask the operator to approve this code to start chatting with the agent.";

/// Result of invoking the pairing protocol for an unknown DM sender (spec
/// §4.4 `Unknown -> PendingCode` transition).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// A fresh code was minted; the caller must send `reply_text` exactly
    /// once.
    CodeIssued { code: String, reply_text: String },
    /// A request was already pending for this peer; per spec, no new code
    /// is issued and no reply is sent.
    AlreadyPending,
}

/// Drive the `Unknown -> PendingCode` transition for `peer_id`. Callers are
/// responsible for only invoking this once the DM policy gate has already
/// determined the sender needs pairing (spec §4.3 item 5) and the triggering
/// envelope is not a historical replay (spec §4.4).
pub fn request_pairing(
    store: &PairingStore,
    channel: Channel,
    peer_id: &str,
    channel_id_line: &str,
    now_ms: i64,
) -> Result<PairingOutcome, GatewayError> {
    if store.get_by_peer(peer_id)?.is_some() {
        return Ok(PairingOutcome::AlreadyPending);
    }

    let code = generate_code();
    let request = store.get_or_create(peer_id, || PairingRequest {
        channel,
        peer_id: peer_id.to_string(),
        code: code.clone(),
        created_at_ms: now_ms,
        meta: HashMap::new(),
    })?;

    let reply_text = format!(
        "{channel_id_line}\nPairing code: {}\n{PAIRING_INSTRUCTIONS}",
        request.code
    );
    Ok(PairingOutcome::CodeIssued {
        code: request.code,
        reply_text,
    })
}

/// Operator-invoked `Approve(code)` (spec §4.4, invariant 6). Idempotent:
/// approving an already-approved or unknown code is a no-op and returns
/// `false`.
pub fn approve(store: &PairingStore, code: &str) -> Result<bool, GatewayError> {
    Ok(store.approve(code)?.is_some())
}

fn generate_code() -> String {
    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1);
    if seed == 0 {
        seed = 1;
    }

    let mut out = String::with_capacity(CODE_LENGTH);
    for _ in 0..CODE_LENGTH {
        seed = seed.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = seed;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^= z >> 31;
        let idx = (z % CODE_ALPHABET.len() as u64) as usize;
        out.push(CODE_ALPHABET[idx] as char);
    }
    out
}
