//! Transfer Ledger service
//!
//! ```text
//! HTTP ──▶ Gateway ──▶ LedgerHandle ──▶ Sequencer ──launch──▶ SagaHost ──▶ TransferSaga ──▶ AccountExecutor
//!                                          │                      │
//!                                    CheckpointStore        terminal reports ──▶ log
//! ```
//!
//! Args: `--env/-e <name>` selects `config/<name>.yaml` (default `dev`),
//! `--port <port>` overrides the gateway port.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use transfer_ledger::config::AppConfig;
use transfer_ledger::gateway::{self, state::AppState};
use transfer_ledger::logging::init_logging;
use transfer_ledger::saga::{AccountOp, InMemoryAccountExecutor, SagaOutcome, SagaReport};
use transfer_ledger::sequencer::LedgerHandle;
use transfer_ledger::substrate::{
    CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, SagaHost,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Operator hook: every terminal saga outcome lands in the log
async fn watch_saga_reports(mut reports: broadcast::Receiver<SagaReport>) {
    loop {
        match reports.recv().await {
            Ok(report) => match (report.outcome, &report.error) {
                (SagaOutcome::Success, _) => info!(
                    reference_id = %report.reference_id,
                    "Transfer settled"
                ),
                (SagaOutcome::CompensatedFailure, _) => warn!(
                    reference_id = %report.reference_id,
                    "Transfer compensated"
                ),
                (outcome, Some(e)) => error!(
                    reference_id = %report.reference_id,
                    %outcome,
                    code = e.code(),
                    error = %e,
                    "Transfer failed"
                ),
                (outcome, None) => error!(
                    reference_id = %report.reference_id,
                    %outcome,
                    "Transfer failed"
                ),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Saga report watcher lagging");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.gateway.port = port;
    }

    let _guard = init_logging(&config);
    info!(
        env = %env,
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        "Starting transfer ledger"
    );

    // Account executor (simulated account store)
    let executor = InMemoryAccountExecutor::new()
        .with_withdraw_latency(Duration::from_millis(config.executor.withdraw_latency_ms));
    executor.set_failing(AccountOp::Withdraw, config.executor.fail_withdraw);
    executor.set_failing(AccountOp::Deposit, config.executor.fail_deposit);
    executor.set_failing(AccountOp::Refund, config.executor.fail_refund);
    let executor = Arc::new(executor);

    // Saga host
    let host = SagaHost::new(executor, config.saga_options())
        .with_finished_retention(config.saga.finished_retention);
    tokio::spawn(watch_saga_reports(host.subscribe()));

    // Checkpoint store + initial state
    let store: Arc<dyn CheckpointStore> = match &config.ledger.checkpoint_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using file checkpoint store");
            Arc::new(FileCheckpointStore::new(dir))
        }
        None => Arc::new(InMemoryCheckpointStore::new()),
    };
    let initial = store
        .recover(config.ledger.event_limit)
        .await
        .context("Failed to recover ledger from checkpoint and journal")?;

    // Ledger sequencer
    let (ledger, ledger_task) = LedgerHandle::spawn(
        config.sequencer_config(),
        initial,
        Arc::new(host.clone()),
        store,
    )
    .context("Failed to start ledger sequencer")?;

    // Gateway (blocks until Ctrl+C)
    let state = Arc::new(AppState::new(ledger.clone()));
    gateway::run_server(&config.gateway, state, shutdown_signal()).await?;

    // Stop taking new sagas, then let the ledger persist its final state
    host.close();
    info!("{}", ledger.stats());
    drop(ledger);
    if tokio::time::timeout(Duration::from_secs(5), ledger_task)
        .await
        .is_err()
    {
        warn!("Ledger did not stop within 5s");
    }

    info!(running_sagas = host.running(), "Shutdown complete");
    Ok(())
}
