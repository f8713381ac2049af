//! murmur-sim
//!
//! Runs the orchestrator against an in-memory ledger: two viewers open a
//! post, one of them types for a while, and the converged aggregate and
//! write metrics are printed as JSON.
//!
//! Configuration comes from `--config <path>` or `MURMUR_CONFIG`, falling
//! back to defaults plus `MURMUR_*` overrides. Pass `--json` for JSON logs.

use murmur_client::{
    init_tracing, Address, InMemoryLedger, LiveAction, LiveCallback, MurmurConfig, MurmurError,
    MurmurResult, Orchestrator, SubjectId, ViewerState,
};
use murmur_core::ConfigError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> MurmurResult<()> {
    let json_logs = std::env::args().any(|arg| arg == "--json");
    init_tracing(json_logs)?;

    let mut config = match MurmurConfig::load() {
        Ok(config) => config,
        Err(ConfigError::MissingConfigPath) => MurmurConfig::from_env(),
        Err(err) => return Err(err.into()),
    };
    if config.live.publisher == Address::ZERO {
        config.live.publisher = Address([0x11; 20]);
    }
    config.validate()?;

    let ledger = InMemoryLedger::new(config.live.publisher);
    let orchestrator = Orchestrator::new(Arc::new(ledger.clone()), config)?;
    orchestrator.start();

    let subject = SubjectId::from("post-42");
    let alice = Address([0xa1; 20]);
    let bob = Address([0xb0; 20]);

    let on_update: LiveCallback = Arc::new(|state: &ViewerState| {
        tracing::info!(
            subject = %state.subject_id,
            viewers = state.viewer_count(),
            typing = state.typing_count(),
            "Live update"
        );
    });
    let subscription = orchestrator.subscribe_live(subject.clone(), on_update).await;

    orchestrator.apply_local_action(&subject, alice, LiveAction::View);
    orchestrator.apply_local_action(&subject, bob, LiveAction::View);
    let state = orchestrator.apply_local_action(&subject, bob, LiveAction::TypingStart);
    tracing::info!(
        viewers = state.viewer_count(),
        typing = state.typing_count(),
        "Optimistic state"
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    orchestrator.apply_local_action(&subject, bob, LiveAction::TypingStop);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let converged = orchestrator.reconcile(&subject).await?;
    orchestrator.unsubscribe_live(subscription);
    orchestrator.shutdown().await;

    let report = serde_json::json!({
        "subject": converged.subject_id,
        "viewers": converged.viewers,
        "typing": converged.typing,
        "phase": format!("{:?}", orchestrator.live_phase(&subject)),
        "metrics": orchestrator.metrics(),
        "queue": orchestrator.queue_snapshot(),
        "cache": {
            "hit_rate": orchestrator.cache_stats().hit_rate(),
        },
        "ledger_block_height": ledger.block_height(),
    });
    let rendered = serde_json::to_string_pretty(&report).map_err(|e| MurmurError::Task {
        reason: format!("Failed to render report: {}", e),
    })?;
    println!("{}", rendered);
    Ok(())
}
