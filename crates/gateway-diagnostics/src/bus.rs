use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::event::DiagnosticEvent;

const BUS_CAPACITY: usize = 1_024;

/// Process-wide publish/subscribe fan-out (spec §4.9). Delivery is
/// best-effort: `emit` never blocks on subscribers, and a slow or absent
/// subscriber never back-pressures the dispatch path.
pub struct DiagnosticsBus {
    tx: broadcast::Sender<DiagnosticEvent>,
    dropped: AtomicU64,
}

impl DiagnosticsBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event. Silently counts the event as dropped when there are
    /// no subscribers rather than erroring — emitters must never care
    /// whether anyone is listening.
    pub fn emit(&self, event: DiagnosticEvent) {
        if self.tx.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for DiagnosticsBus {
    fn default() -> Self {
        Self::new()
    }
}
