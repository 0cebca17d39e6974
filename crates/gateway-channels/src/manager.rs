use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use gateway_core::types::Channel as ChannelKind;
use gateway_core::GatewayError;
use gateway_diagnostics::{DiagnosticEvent, DiagnosticsBus};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::circuit::{CircuitBreaker, CircuitState};

struct Registration {
    adapter: Arc<dyn Channel>,
    breaker: Mutex<CircuitBreaker>,
}

/// Holds one adapter per configured [`ChannelKind`] and drives its
/// reconnect-with-backoff loop behind a [`CircuitBreaker`].
pub struct ChannelManager {
    channels: DashMap<ChannelKind, Arc<Registration>>,
    diagnostics: Arc<DiagnosticsBus>,
}

impl ChannelManager {
    pub fn new(diagnostics: Arc<DiagnosticsBus>) -> Self {
        Self {
            channels: DashMap::new(),
            diagnostics,
        }
    }

    pub fn register(
        &self,
        kind: ChannelKind,
        adapter: Arc<dyn Channel>,
        breaker_config: gateway_core::config::CircuitBreakerConfig,
    ) {
        self.channels.insert(
            kind,
            Arc::new(Registration {
                adapter,
                breaker: Mutex::new(CircuitBreaker::new(breaker_config)),
            }),
        );
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Channel>> {
        self.channels.get(&kind).map(|r| r.adapter.clone())
    }

    /// Start every registered adapter, each under its own reconnect loop, so
    /// one channel's failure never blocks another's ingestion (spec §4.1).
    pub async fn start_all(&self, sink: Arc<dyn crate::channel::InboundSink>) {
        for entry in self.channels.iter() {
            let kind = *entry.key();
            let registration = entry.value().clone();
            let diagnostics = self.diagnostics.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                run_with_backoff(kind, registration, sink, diagnostics).await;
            });
        }
    }

    pub async fn stop_all(&self) {
        for entry in self.channels.iter() {
            if let Err(e) = entry.value().adapter.stop().await {
                warn!(channel = %entry.key(), error = %e, "channel stop failed");
            }
        }
    }
}

async fn run_with_backoff(
    kind: ChannelKind,
    registration: Arc<Registration>,
    sink: Arc<dyn crate::channel::InboundSink>,
    diagnostics: Arc<DiagnosticsBus>,
) {
    loop {
        {
            let mut breaker = registration.breaker.lock().await;
            if breaker.state() == CircuitState::Open {
                let delay = breaker.next_delay_ms();
                drop(breaker);
                sleep(Duration::from_millis(delay)).await;
                let mut breaker = registration.breaker.lock().await;
                if let Some(t) = breaker.allow_probe() {
                    emit_transition(&diagnostics, kind, t.from, t.to);
                }
            }
        }

        match registration.adapter.start(sink.clone()).await {
            Ok(()) => {
                let mut breaker = registration.breaker.lock().await;
                if let Some(t) = breaker.record_success() {
                    emit_transition(&diagnostics, kind, t.from, t.to);
                }
                info!(channel = %kind, "channel adapter stopped cleanly");
                return;
            }
            Err(e) => {
                warn!(channel = %kind, error = %e, "channel adapter failed");
                let mut breaker = registration.breaker.lock().await;
                if let Some(t) = breaker.record_failure() {
                    emit_transition(&diagnostics, kind, t.from, t.to);
                }
                if matches!(e, GatewayError::PermanentError { .. }) {
                    return;
                }
                let delay = breaker.next_delay_ms();
                drop(breaker);
                sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

fn emit_transition(
    diagnostics: &DiagnosticsBus,
    kind: ChannelKind,
    from: CircuitState,
    to: CircuitState,
) {
    let name = format!("relay.circuit_breaker.{}", state_name(to));
    diagnostics.emit(DiagnosticEvent::Custom {
        name,
        payload: json!({
            "channel": kind.to_string(),
            "from": state_name(from),
            "to": state_name(to),
        }),
    });
}

fn state_name(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}
