//! Saga process host
//!
//! Runs each transfer saga as a detached tokio task keyed by its
//! [`ProcessId`]. Starting the same id twice is a no-op, which is what makes
//! re-dispatch after a checkpoint safe. A hosted saga outlives the sequencer
//! instance that started it.
//!
//! Finished processes are remembered up to a retention bound, oldest evicted
//! first. A duplicate start past that bound runs the saga again; the account
//! executor's per-reference idempotency absorbs it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::core_types::{LedgerRecord, ProcessId};
use crate::saga::{AccountExecutor, SagaOptions, SagaOutcome, SagaReport, TransferSaga};
use crate::sequencer::{LaunchError, SagaLauncher, StartAck};

/// Terminal reports kept for slow subscribers
const REPORT_BUFFER: usize = 1024;

/// Finished processes remembered for duplicate detection
pub const DEFAULT_FINISHED_RETENTION: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Finished(SagaOutcome),
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "RUNNING"),
            ProcessStatus::Finished(outcome) => write!(f, "{}", outcome),
        }
    }
}

/// Hosts transfer sagas
#[derive(Clone)]
pub struct SagaHost {
    executor: Arc<dyn AccountExecutor>,
    options: SagaOptions,
    processes: Arc<DashMap<ProcessId, ProcessStatus>>,
    /// Finished ids, oldest first
    finished: Arc<Mutex<VecDeque<ProcessId>>>,
    finished_retention: usize,
    reports: broadcast::Sender<SagaReport>,
    closed: Arc<AtomicBool>,
}

impl SagaHost {
    pub fn new(executor: Arc<dyn AccountExecutor>, options: SagaOptions) -> Self {
        let (reports, _) = broadcast::channel(REPORT_BUFFER);
        Self {
            executor,
            options,
            processes: Arc::new(DashMap::new()),
            finished: Arc::new(Mutex::new(VecDeque::new())),
            finished_retention: DEFAULT_FINISHED_RETENTION,
            reports,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_finished_retention(mut self, retention: usize) -> Self {
        self.finished_retention = retention;
        self
    }

    /// Stream of terminal saga reports (the operator/monitoring hook)
    pub fn subscribe(&self) -> broadcast::Receiver<SagaReport> {
        self.reports.subscribe()
    }

    pub fn status(&self, process_id: &ProcessId) -> Option<ProcessStatus> {
        self.processes.get(process_id).map(|s| *s)
    }

    /// Number of processes tracked, running and retained finished ones
    pub fn tracked(&self) -> usize {
        self.processes.len()
    }

    /// Number of sagas not yet finished
    pub fn running(&self) -> usize {
        self.processes
            .iter()
            .filter(|entry| *entry.value() == ProcessStatus::Running)
            .count()
    }

    /// Refuse new sagas; running ones carry on
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!(running = self.running(), "Saga host closed");
    }

    /// Start the saga for `record` unless a process with its id exists.
    ///
    /// Resolves once the task is running; never waits for the transfer itself.
    pub async fn start(&self, record: LedgerRecord) -> Result<StartAck, LaunchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LaunchError::HostShutdown);
        }

        let process_id = record.process_id();
        match self.processes.entry(process_id.clone()) {
            Entry::Occupied(existing) => {
                debug!(%process_id, status = %existing.get(), "Saga already hosted");
                return Ok(StartAck::AlreadyStarted(process_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(ProcessStatus::Running);
            }
        }

        let (started_tx, started_rx) = oneshot::channel();
        let saga = TransferSaga::new(&record, self.executor.clone(), self.options.clone());
        let host = self.clone();
        let task_id = process_id.clone();

        tokio::spawn(async move {
            let _ = started_tx.send(());
            let report = saga.run().await;
            host.finish(task_id, report.outcome);
            // no subscribers is fine
            let _ = host.reports.send(report);
        });

        match started_rx.await {
            Ok(()) => {
                info!(%process_id, "Saga process started");
                Ok(StartAck::Started(process_id))
            }
            Err(_) => {
                // task died before running; free the id so a retry can start it
                self.processes.remove(&process_id);
                Err(LaunchError::NotStarted(process_id))
            }
        }
    }
}

impl SagaHost {
    /// Mark a process finished and evict the oldest beyond retention
    fn finish(&self, process_id: ProcessId, outcome: SagaOutcome) {
        self.processes
            .insert(process_id.clone(), ProcessStatus::Finished(outcome));

        let evicted: Vec<ProcessId> = match self.finished.lock() {
            Ok(mut finished) => {
                finished.push_back(process_id);
                let excess = finished.len().saturating_sub(self.finished_retention);
                finished.drain(..excess).collect()
            }
            Err(_) => {
                warn!("Finished-process queue poisoned, nothing evicted");
                Vec::new()
            }
        };
        for id in evicted {
            self.processes
                .remove_if(&id, |_, status| matches!(status, ProcessStatus::Finished(_)));
            debug!(process_id = %id, "Finished saga process evicted");
        }
    }
}

#[async_trait]
impl SagaLauncher for SagaHost {
    async fn launch(&self, record: LedgerRecord) -> Result<StartAck, LaunchError> {
        self.start(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::TransactionDetails;
    use crate::saga::InMemoryAccountExecutor;
    use std::time::Duration;

    fn host() -> (SagaHost, Arc<InMemoryAccountExecutor>) {
        let executor = Arc::new(InMemoryAccountExecutor::new());
        (SagaHost::new(executor.clone(), SagaOptions::default()), executor)
    }

    #[tokio::test]
    async fn test_start_reports_terminal_outcome() {
        let (host, executor) = host();
        let mut reports = host.subscribe();
        let record = LedgerRecord::new(1, TransactionDetails::new("123", "456", 42));

        let ack = host.start(record.clone()).await.unwrap();
        assert_eq!(ack, StartAck::Started(record.process_id()));

        let report = tokio::time::timeout(Duration::from_secs(1), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, SagaOutcome::Success);
        assert_eq!(
            host.status(&record.process_id()),
            Some(ProcessStatus::Finished(SagaOutcome::Success))
        );
        assert_eq!(executor.balance_delta("456"), 42);
    }

    #[tokio::test]
    async fn test_same_process_id_starts_once() {
        let (host, executor) = host();
        let record = LedgerRecord::new(7, TransactionDetails::new("123", "456", 10));

        let first = host.start(record.clone()).await.unwrap();
        let second = host.launch(record.clone()).await.unwrap();
        assert!(matches!(first, StartAck::Started(_)));
        assert_eq!(second, StartAck::AlreadyStarted(record.process_id()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.balance_delta("123"), -10);
        assert_eq!(host.running(), 0);
    }

    #[tokio::test]
    async fn test_finished_processes_evicted_past_retention() {
        let executor = Arc::new(InMemoryAccountExecutor::new());
        let host =
            SagaHost::new(executor.clone(), SagaOptions::default()).with_finished_retention(2);
        let mut reports = host.subscribe();

        let records: Vec<LedgerRecord> = (1..=3)
            .map(|n| LedgerRecord::new(n, TransactionDetails::new("123", "456", 1)))
            .collect();
        for record in &records {
            host.start(record.clone()).await.unwrap();
            tokio::time::timeout(Duration::from_secs(1), reports.recv())
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(host.tracked(), 2);
        assert_eq!(host.status(&records[0].process_id()), None);

        // still retained: a duplicate is recognised
        let again = host.start(records[2].clone()).await.unwrap();
        assert_eq!(again, StartAck::AlreadyStarted(records[2].process_id()));

        // evicted: runs again, the executor ignores the repeat
        let rerun = host.start(records[0].clone()).await.unwrap();
        assert_eq!(rerun, StartAck::Started(records[0].process_id()));
        tokio::time::timeout(Duration::from_secs(1), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(executor.balance_delta("456"), 3);
        assert_eq!(host.tracked(), 2);
    }

    #[tokio::test]
    async fn test_closed_host_refuses_new_sagas() {
        let (host, _executor) = host();
        host.close();
        let record = LedgerRecord::new(1, TransactionDetails::new("123", "456", 1));
        assert_eq!(host.start(record).await, Err(LaunchError::HostShutdown));
    }
}
