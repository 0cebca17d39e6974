use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gateway_core::types::SessionRecord;
use gateway_core::GatewayError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Document {
    version: u32,
    sessions: HashMap<String, SessionRecord>,
}

/// Per-agent session-resumption map (spec §4.8, `sessions/sessions.json`).
/// Mutated only by the scheduler on turn completion; read by the Agent Turn
/// Runner to resume context.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn open(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("sessions").join("sessions.json"),
        }
    }

    pub fn get(&self, session_key: &str) -> Result<Option<SessionRecord>, GatewayError> {
        let doc: Document = crate::atomic::read_json(&self.path, Document::default())?;
        Ok(doc.sessions.get(session_key).cloned())
    }

    pub fn put(&self, session_key: &str, record: SessionRecord) -> Result<(), GatewayError> {
        crate::atomic::update_json(&self.path, Document::default(), |mut doc| {
            doc.version = 1;
            doc.sessions.insert(session_key.to_string(), record);
            doc
        })?;
        Ok(())
    }
}
