use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::config::GatewayConfig;
use gateway_core::types::{InboundEnvelope, SessionKey, TurnOutcome, TurnResult};
use gateway_scheduler::{AgentTurnRunner, ReplySink};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod app;

/// Placeholder Agent Turn Runner wired in until a real agent runtime is
/// registered (spec §1: the agent runtime is an external collaborator named
/// only by interface). Every turn fails immediately so the absence of a
/// real runner is visible in diagnostics rather than silently swallowed.
struct UnconfiguredTurnRunner;

#[async_trait]
impl AgentTurnRunner for UnconfiguredTurnRunner {
    async fn run_turn(
        &self,
        session_key: &SessionKey,
        _envelope: InboundEnvelope,
        _reply: Arc<dyn ReplySink>,
        _cancel: CancellationToken,
    ) -> TurnResult {
        warn!(%session_key, "no agent turn runner registered");
        TurnResult {
            outcome: TurnOutcome::Error {
                reason: "no agent turn runner registered".to_string(),
            },
            tokens_in: 0,
            tokens_out: 0,
            duration_ms: 0,
            model: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_server=info".into()),
        )
        .init();

    // load config: explicit path > GATEWAY_CONFIG env > ~/.openclaw/gateway.toml
    let config_path = std::env::var("GATEWAY_CONFIG").ok();
    let config = GatewayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        GatewayConfig::default()
    });

    let connected_at_ms = chrono::Utc::now().timestamp_millis();
    let app = Arc::new(app::GatewayApp::new(
        config,
        Arc::new(UnconfiguredTurnRunner),
        &HashMap::new(),
        connected_at_ms,
    ));

    info!(state_dir = %app.state_dir(), "gateway server starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_handle = tokio::spawn(app.lane_table().run_stuck_sweep(shutdown_rx));

    app.start().await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping channel adapters");
    app.stop().await;

    let _ = shutdown_tx.send(true);
    let _ = sweep_handle.await;

    Ok(())
}
