//! Ledger Sequencer actor
//!
//! One tokio task owns the [`SequencerState`]. Callers talk to it through a
//! [`LedgerHandle`] over an mpsc channel, so every update is totally ordered.
//!
//! ```text
//! LedgerHandle ──Command──▶ [mpsc] ──▶ instance N ──ContinueAsNew(StartInput)──▶ instance N+1
//!                                         │
//!                                         └─ dispatch ──▶ SagaLauncher (await start ack only)
//! ```
//!
//! A checkpoint ends the running instance and hands its [`StartInput`] to the
//! supervisor, which builds the successor on the same channel. Callers never
//! notice the handoff.
//!
//! Between checkpoints every accepted record is journaled through the
//! [`CheckpointStore`] before its caller gets a reply, so an acknowledged id
//! survives a crash and is never handed out twice.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::error::SequencerError;
use super::launcher::{LaunchError, SagaLauncher, StartAck};
use super::state::{DEFAULT_EVENT_LIMIT, SequencerState, StartInput};
use super::stats::{LedgerStats, LedgerStatsSnapshot};
use crate::core_types::{LedgerRecord, SeqNum, TransactionDetails};
use crate::substrate::checkpoint::{CheckpointError, CheckpointStore};
use crate::substrate::event_log::{DEFAULT_SOFT_LIMIT, EventKind, EventLog};

/// Configuration for the sequencer actor
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Updates per instance before a checkpoint (ignored when seeding from a checkpoint)
    pub event_limit: u64,
    /// Event-log size at which a checkpoint is advised
    pub event_log_soft_limit: u64,
    /// Capacity of the command channel
    pub command_buffer: usize,
    /// Pause before re-dispatching a record whose launch failed
    pub dispatch_retry_delay: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            event_limit: DEFAULT_EVENT_LIMIT,
            event_log_soft_limit: DEFAULT_SOFT_LIMIT,
            command_buffer: 1024,
            dispatch_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Point-in-time view of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LedgerStatus {
    pub next_id: SeqNum,
    pub history_len: usize,
    pub pending_len: usize,
    pub event_limit: u64,
    pub event_counter: u64,
    pub stats: LedgerStatsSnapshot,
}

pub(crate) enum Command {
    Enqueue {
        details: TransactionDetails,
        reply: oneshot::Sender<Result<LedgerRecord, SequencerError>>,
    },
    GetHistory {
        reply: oneshot::Sender<Vec<LedgerRecord>>,
    },
    Status {
        reply: oneshot::Sender<LedgerStatus>,
    },
    Checkpoint {
        reply: oneshot::Sender<Result<(), SequencerError>>,
    },
}

enum RunOutcome {
    /// Successor takes over with this state
    ContinueAsNew(StartInput),
    /// Every handle is gone
    Stopped,
}

type Dispatch = BoxFuture<'static, (LedgerRecord, Result<StartAck, LaunchError>)>;

struct SequencerInstance {
    state: SequencerState,
    event_log: EventLog,
    launcher: Arc<dyn SagaLauncher>,
    store: Arc<dyn CheckpointStore>,
    stats: Arc<LedgerStats>,
    dispatch_retry_delay: Duration,
    in_flight: Option<Dispatch>,
    retry_at: Option<Instant>,
    forced: Vec<oneshot::Sender<Result<(), SequencerError>>>,
}

impl SequencerInstance {
    fn new(
        input: StartInput,
        config: &SequencerConfig,
        launcher: Arc<dyn SagaLauncher>,
        store: Arc<dyn CheckpointStore>,
        stats: Arc<LedgerStats>,
    ) -> Self {
        Self {
            state: SequencerState::from_start_input(input),
            event_log: EventLog::new(config.event_log_soft_limit),
            launcher,
            store,
            stats,
            dispatch_retry_delay: config.dispatch_retry_delay,
            in_flight: None,
            retry_at: None,
            forced: Vec::new(),
        }
    }

    async fn run(mut self, commands: &mut mpsc::Receiver<Command>) -> RunOutcome {
        loop {
            // a forced checkpoint waits until no dispatch is in flight
            if self.in_flight.is_none() && !self.forced.is_empty() {
                match self.try_checkpoint("forced").await {
                    Ok(next) => return RunOutcome::ContinueAsNew(next),
                    Err(e) => {
                        let reply = Err(SequencerError::CheckpointFailed(e.to_string()));
                        for waiter in self.forced.drain(..) {
                            let _ = waiter.send(reply.clone());
                        }
                    }
                }
            }

            if self.in_flight.is_none() && self.retry_at.is_none() {
                if let Some(record) = self.state.pop_pending() {
                    self.in_flight = Some(self.dispatch(record));
                }
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => return self.shutdown().await,
                },
                (record, result) = next_ack(&mut self.in_flight) => {
                    self.in_flight = None;
                    if let Some(next) = self.on_dispatched(record, result).await {
                        return RunOutcome::ContinueAsNew(next);
                    }
                }
                () = retry_due(self.retry_at) => {
                    self.retry_at = None;
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { details, reply } => {
                let record = self.state.next_record(details);
                if let Err(e) = self.store.append(&record).await {
                    self.stats.incr_append_faults();
                    warn!(
                        record_id = %record.id,
                        error = %e,
                        code = e.code(),
                        "Journal append failed, transfer request refused"
                    );
                    let _ = reply.send(Err(SequencerError::NotRecorded(e.to_string())));
                    return;
                }
                self.state.accept(record.clone());
                self.event_log.record(EventKind::UpdateAccepted);
                self.stats.incr_enqueued();
                debug!(
                    record_id = %record.id,
                    pending = self.state.pending_len(),
                    "Transfer request recorded"
                );
                // caller gone; the record stands regardless
                let _ = reply.send(Ok(record));
            }
            Command::GetHistory { reply } => {
                let _ = reply.send(self.state.history());
            }
            Command::Status { reply } => {
                let _ = reply.send(LedgerStatus {
                    next_id: self.state.next_id(),
                    history_len: self.state.history_len(),
                    pending_len: self.state.pending_len(),
                    event_limit: self.state.event_limit(),
                    event_counter: self.state.event_counter(),
                    stats: self.stats.snapshot(),
                });
            }
            Command::Checkpoint { reply } => {
                self.forced.push(reply);
            }
        }
    }

    fn dispatch(&self, record: LedgerRecord) -> Dispatch {
        let launcher = self.launcher.clone();
        async move {
            let result = launcher.launch(record.clone()).await;
            (record, result)
        }
        .boxed()
    }

    async fn on_dispatched(
        &mut self,
        record: LedgerRecord,
        result: Result<StartAck, LaunchError>,
    ) -> Option<StartInput> {
        match result {
            Ok(ack) => {
                self.event_log.record(EventKind::ChildStarted);
                self.stats.incr_dispatched();
                match &ack {
                    StartAck::Started(process_id) => {
                        info!(record_id = %record.id, %process_id, "Transfer saga started");
                    }
                    StartAck::AlreadyStarted(process_id) => {
                        self.stats.incr_redispatched();
                        info!(record_id = %record.id, %process_id, "Transfer saga already running");
                    }
                }

                let reason = if self.event_log.checkpoint_suggested() {
                    "event_log"
                } else if self.state.event_limit_exceeded() {
                    "event_limit"
                } else {
                    return None;
                };
                self.try_checkpoint(reason).await.ok()
            }
            Err(e) => {
                self.event_log.record(EventKind::ChildStartFailed);
                self.stats.incr_dispatch_failures();
                warn!(
                    record_id = %record.id,
                    error = %e,
                    code = e.code(),
                    retry_in_ms = self.dispatch_retry_delay.as_millis() as u64,
                    "Saga launch failed, record requeued"
                );
                self.state.requeue_front(record);
                self.retry_at = Some(Instant::now() + self.dispatch_retry_delay);
                None
            }
        }
    }

    /// On failure the instance keeps running with its state untouched
    async fn try_checkpoint(&mut self, reason: &'static str) -> Result<StartInput, CheckpointError> {
        let next = self.state.checkpoint();
        match self.store.save(&next).await {
            Ok(metadata) => {
                self.stats.incr_checkpoints();
                info!(
                    reason,
                    next_id = metadata.next_id,
                    history_len = metadata.history_len,
                    pending = metadata.pending_len,
                    events = self.event_log.len(),
                    "Checkpoint taken, handing over to successor"
                );
                // any checkpoint satisfies callers waiting on a forced one
                for waiter in self.forced.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                Ok(next)
            }
            Err(e) => {
                self.stats.incr_checkpoint_faults();
                warn!(
                    reason,
                    error = %e,
                    code = e.code(),
                    "Checkpoint failed, continuing un-checkpointed"
                );
                Err(e)
            }
        }
    }

    async fn shutdown(mut self) -> RunOutcome {
        if let Some(dispatch) = self.in_flight.take() {
            let (record, result) = dispatch.await;
            if result.is_err() {
                self.state.requeue_front(record);
            }
        }
        let next = self.state.checkpoint();
        match self.store.save(&next).await {
            Ok(_) => info!(
                next_id = next.next_id,
                pending = next.pending_queue.len(),
                "Ledger stopped, final checkpoint saved"
            ),
            Err(e) => error!(
                error = %e,
                pending = next.pending_queue.len(),
                "Ledger stopped, final checkpoint failed"
            ),
        }
        RunOutcome::Stopped
    }
}

async fn next_ack(in_flight: &mut Option<Dispatch>) -> (LedgerRecord, Result<StartAck, LaunchError>) {
    match in_flight {
        Some(dispatch) => dispatch.await,
        None => std::future::pending().await,
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Run successive sequencer instances until every handle is dropped
async fn run_ledger(
    initial: StartInput,
    config: SequencerConfig,
    launcher: Arc<dyn SagaLauncher>,
    store: Arc<dyn CheckpointStore>,
    stats: Arc<LedgerStats>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut input = initial;
    loop {
        stats.incr_instances();
        debug!(
            next_id = input.next_id,
            history_len = input.history.len(),
            pending = input.pending_queue.len(),
            "Sequencer instance starting"
        );
        let instance = SequencerInstance::new(
            input,
            &config,
            launcher.clone(),
            store.clone(),
            stats.clone(),
        );
        match instance.run(&mut commands).await {
            RunOutcome::ContinueAsNew(next) => input = next,
            RunOutcome::Stopped => return,
        }
    }
}

/// Cloneable entry point to the ledger; stable across checkpoints
#[derive(Clone)]
pub struct LedgerHandle {
    commands: mpsc::Sender<Command>,
    stats: Arc<LedgerStats>,
}

impl LedgerHandle {
    /// Start the ledger actor.
    ///
    /// `initial` seeds the first instance (e.g. the latest persisted
    /// checkpoint); without it the ledger starts empty with id "1" next.
    pub fn spawn(
        config: SequencerConfig,
        initial: Option<StartInput>,
        launcher: Arc<dyn SagaLauncher>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<(Self, JoinHandle<()>), SequencerError> {
        let initial = initial.unwrap_or_else(|| StartInput::fresh(config.event_limit));
        initial.validate()?;

        info!(
            next_id = initial.next_id,
            history_len = initial.history.len(),
            pending = initial.pending_queue.len(),
            event_limit = initial.event_limit,
            "Starting ledger sequencer"
        );

        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let stats = Arc::new(LedgerStats::new());
        let task = tokio::spawn(run_ledger(
            initial,
            config,
            launcher,
            store,
            stats.clone(),
            rx,
        ));

        Ok((
            Self {
                commands: tx,
                stats,
            },
            task,
        ))
    }

    /// Record a transfer request and return its ledger record.
    ///
    /// Returns as soon as the record is journaled and in history; saga
    /// dispatch happens later.
    pub async fn enqueue(
        &self,
        transaction_details: TransactionDetails,
    ) -> Result<LedgerRecord, SequencerError> {
        self.request(|reply| Command::Enqueue {
            details: transaction_details,
            reply,
        })
        .await?
    }

    /// Copy of the full history in id order
    pub async fn history(&self) -> Result<Vec<LedgerRecord>, SequencerError> {
        self.request(|reply| Command::GetHistory { reply }).await
    }

    pub async fn status(&self) -> Result<LedgerStatus, SequencerError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Force a checkpoint once the in-flight dispatch (if any) is acknowledged
    pub async fn checkpoint(&self) -> Result<(), SequencerError> {
        self.request(|reply| Command::Checkpoint { reply }).await?
    }

    /// Counters, readable without a round-trip to the actor
    pub fn stats(&self) -> LedgerStatsSnapshot {
        self.stats.snapshot()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SequencerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SequencerError::Unavailable)?;
        response.await.map_err(|_| SequencerError::Unavailable)
    }
}
