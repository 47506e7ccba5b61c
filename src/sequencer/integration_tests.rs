//! Integration Tests for the Ledger Sequencer
//!
//! Drive the actor through `LedgerHandle` with a recording launcher and an
//! in-memory checkpoint store. No sagas run here.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::core_types::{LedgerRecord, TransactionDetails};
use crate::substrate::checkpoint::{
    CheckpointError, CheckpointMetadata, CheckpointStore, InMemoryCheckpointStore,
};

/// Records every launch; optionally fails the first N attempts
#[derive(Default)]
struct RecordingLauncher {
    launched: Mutex<Vec<LedgerRecord>>,
    failures_left: AtomicUsize,
}

impl RecordingLauncher {
    fn failing_first(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    fn launched_ids(&self) -> Vec<String> {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
impl SagaLauncher for RecordingLauncher {
    async fn launch(&self, record: LedgerRecord) -> Result<StartAck, LaunchError> {
        let process_id = record.process_id();
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(LaunchError::NotStarted(process_id));
        }
        self.launched.lock().unwrap().push(record);
        Ok(StartAck::Started(process_id))
    }
}

/// In-memory store whose saves or journal appends can be switched to fail
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryCheckpointStore,
    broken: AtomicBool,
    journal_broken: AtomicBool,
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save(&self, input: &StartInput) -> Result<CheckpointMetadata, CheckpointError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(CheckpointError::Io("disk unavailable".into()));
        }
        self.inner.save(input).await
    }

    async fn load_latest(&self) -> Result<Option<StartInput>, CheckpointError> {
        self.inner.load_latest().await
    }

    async fn append(&self, record: &LedgerRecord) -> Result<(), CheckpointError> {
        if self.journal_broken.load(Ordering::SeqCst) {
            return Err(CheckpointError::Io("journal unavailable".into()));
        }
        self.inner.append(record).await
    }

    async fn journaled(&self) -> Result<Vec<LedgerRecord>, CheckpointError> {
        self.inner.journaled().await
    }
}

fn test_config(event_limit: u64) -> SequencerConfig {
    SequencerConfig {
        event_limit,
        dispatch_retry_delay: Duration::from_millis(5),
        ..Default::default()
    }
}

fn details(n: u64) -> TransactionDetails {
    TransactionDetails::new("123", "456", n)
}

async fn wait_for_dispatched(handle: &LedgerHandle, expected: u64) {
    for _ in 0..200 {
        if handle.stats().dispatched >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} dispatches, stats: {}",
        expected,
        handle.stats()
    );
}

// ========================================================================
// Ordering
// ========================================================================

#[tokio::test]
async fn test_ids_are_sequential_and_history_ordered() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) =
        LedgerHandle::spawn(test_config(100), None, launcher.clone(), store).unwrap();

    let mut ids = Vec::new();
    for n in 1..=10 {
        ids.push(handle.enqueue(details(n)).await.unwrap().id);
    }
    let expected: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
    assert_eq!(ids, expected);

    let history: Vec<String> = handle
        .history()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(history, expected);

    wait_for_dispatched(&handle, 10).await;
    assert_eq!(launcher.launched_ids(), expected);
}

#[tokio::test]
async fn test_history_visible_before_dispatch() {
    // every launch fails, so nothing is ever dispatched
    let launcher = Arc::new(RecordingLauncher::failing_first(usize::MAX));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) = LedgerHandle::spawn(test_config(100), None, launcher, store).unwrap();

    let record = handle.enqueue(details(7)).await.unwrap();
    let history = handle.history().await.unwrap();
    assert_eq!(history, vec![record]);
    assert_eq!(handle.stats().dispatched, 0);
}

// ========================================================================
// Checkpointing
// ========================================================================

#[tokio::test]
async fn test_two_transfers_stay_below_event_limit() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) =
        LedgerHandle::spawn(test_config(3), None, launcher, store.clone()).unwrap();

    handle.enqueue(details(1)).await.unwrap();
    handle.enqueue(details(2)).await.unwrap();
    wait_for_dispatched(&handle, 2).await;

    let stats = handle.stats();
    assert_eq!(stats.checkpoints, 0);
    assert_eq!(stats.instances_started, 1);
    assert_eq!(store.saved_count(), 0);
}

#[tokio::test]
async fn test_event_limit_three_five_transfers_one_checkpoint() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) =
        LedgerHandle::spawn(test_config(3), None, launcher.clone(), store).unwrap();

    for n in 1..=5 {
        handle.enqueue(details(n)).await.unwrap();
    }
    wait_for_dispatched(&handle, 5).await;

    let stats = handle.stats();
    assert_eq!(stats.checkpoints, 1);
    assert_eq!(stats.instances_started, 2);

    let history: Vec<String> = handle
        .history()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(history, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(launcher.launched_ids(), history);
}

#[tokio::test]
async fn test_event_log_soft_limit_triggers_checkpoint() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = SequencerConfig {
        event_log_soft_limit: 2,
        ..test_config(100)
    };
    let (handle, _task) = LedgerHandle::spawn(config, None, launcher, store.clone()).unwrap();

    // one accepted update + one started child reach the soft limit
    handle.enqueue(details(1)).await.unwrap();
    wait_for_dispatched(&handle, 1).await;
    let status = handle.status().await.unwrap();

    assert_eq!(status.stats.checkpoints, 1);
    assert_eq!(status.stats.instances_started, 2);
    assert_eq!(status.event_counter, 0);
    assert_eq!(store.saved_count(), 1);
    assert_eq!(store.load_latest().await.unwrap().unwrap().next_id, 2);
}

#[tokio::test]
async fn test_forced_checkpoint_preserves_history() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) =
        LedgerHandle::spawn(test_config(100), None, launcher, store.clone()).unwrap();

    for n in 1..=4 {
        handle.enqueue(details(n)).await.unwrap();
    }
    let before = handle.history().await.unwrap();

    handle.checkpoint().await.unwrap();
    let after = handle.history().await.unwrap();

    assert_eq!(
        serde_json::to_vec(&before).unwrap(),
        serde_json::to_vec(&after).unwrap()
    );
    assert_eq!(handle.stats().instances_started, 2);
    assert_eq!(store.load_latest().await.unwrap().unwrap().history, before);

    // the successor continues the id sequence
    assert_eq!(handle.enqueue(details(5)).await.unwrap().id, "5");
}

#[tokio::test]
async fn test_failed_checkpoint_keeps_instance_running() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(FlakyStore::default());
    store.broken.store(true, Ordering::SeqCst);
    let (handle, _task) =
        LedgerHandle::spawn(test_config(1), None, launcher, store.clone()).unwrap();

    for n in 1..=3 {
        handle.enqueue(details(n)).await.unwrap();
    }
    wait_for_dispatched(&handle, 3).await;

    let stats = handle.stats();
    assert_eq!(stats.checkpoints, 0);
    assert!(stats.checkpoint_faults >= 1);
    assert_eq!(stats.instances_started, 1);

    let err = handle.checkpoint().await.unwrap_err();
    assert!(matches!(err, SequencerError::CheckpointFailed(_)));

    // nothing was lost and ids keep counting
    assert_eq!(handle.history().await.unwrap().len(), 3);
    assert_eq!(handle.enqueue(details(4)).await.unwrap().id, "4");
    wait_for_dispatched(&handle, 4).await;

    // once the store recovers the overdue checkpoint goes through
    store.broken.store(false, Ordering::SeqCst);
    handle.checkpoint().await.unwrap();
    assert_eq!(handle.stats().instances_started, 2);
}

// ========================================================================
// Journal
// ========================================================================

#[tokio::test]
async fn test_acknowledged_record_survives_crash_between_checkpoints() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, task) =
        LedgerHandle::spawn(test_config(100), None, launcher.clone(), store.clone()).unwrap();

    handle.enqueue(details(1)).await.unwrap();
    handle.checkpoint().await.unwrap();
    let acked = handle.enqueue(details(2)).await.unwrap();
    assert_eq!(acked.id, "2");

    // crash: no final checkpoint
    task.abort();
    let _ = task.await;
    assert_eq!(store.load_latest().await.unwrap().unwrap().next_id, 2);

    let recovered = store.recover(100).await.unwrap().unwrap();
    assert_eq!(recovered.next_id, 3);
    assert_eq!(recovered.history.last(), Some(&acked));

    let (handle, _task) =
        LedgerHandle::spawn(test_config(100), Some(recovered), launcher, store).unwrap();
    let history: Vec<String> = handle
        .history()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(history, vec!["1", "2"]);
    assert_eq!(handle.enqueue(details(3)).await.unwrap().id, "3");
}

#[tokio::test]
async fn test_failed_append_refuses_request_without_consuming_id() {
    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(FlakyStore::default());
    store.journal_broken.store(true, Ordering::SeqCst);
    let (handle, _task) =
        LedgerHandle::spawn(test_config(100), None, launcher, store.clone()).unwrap();

    let err = handle.enqueue(details(1)).await.unwrap_err();
    assert!(matches!(err, SequencerError::NotRecorded(_)));
    assert!(handle.history().await.unwrap().is_empty());
    assert_eq!(handle.stats().append_faults, 1);
    assert_eq!(handle.stats().enqueued, 0);

    store.journal_broken.store(false, Ordering::SeqCst);
    assert_eq!(handle.enqueue(details(1)).await.unwrap().id, "1");
}

// ========================================================================
// Dispatch
// ========================================================================

#[tokio::test]
async fn test_failed_launch_is_retried_in_order() {
    let launcher = Arc::new(RecordingLauncher::failing_first(2));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) =
        LedgerHandle::spawn(test_config(100), None, launcher.clone(), store).unwrap();

    for n in 1..=3 {
        handle.enqueue(details(n)).await.unwrap();
    }
    wait_for_dispatched(&handle, 3).await;

    assert_eq!(launcher.launched_ids(), vec!["1", "2", "3"]);
    assert_eq!(handle.stats().dispatch_failures, 2);
}

#[tokio::test]
async fn test_seeded_start_input_resumes_pending_and_ids() {
    let mut input = StartInput::fresh(3);
    for n in 1..=2 {
        let record = LedgerRecord::new(n, details(n));
        input.history.push(record.clone());
        if n == 2 {
            input.pending_queue.push_back(record);
        }
    }
    input.next_id = 3;

    let launcher = Arc::new(RecordingLauncher::default());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, _task) =
        LedgerHandle::spawn(test_config(3), Some(input), launcher.clone(), store).unwrap();

    assert_eq!(handle.enqueue(details(3)).await.unwrap().id, "3");
    wait_for_dispatched(&handle, 2).await;
    assert_eq!(launcher.launched_ids(), vec!["2", "3"]);

    let status = handle.status().await.unwrap();
    assert_eq!(status.next_id, 4);
    assert_eq!(status.history_len, 3);
}

#[tokio::test]
async fn test_invalid_start_input_is_rejected() {
    let mut input = StartInput::fresh(3);
    input.history.push(LedgerRecord::new(5, details(5)));
    input.next_id = 2;

    let result = LedgerHandle::spawn(
        test_config(3),
        Some(input),
        Arc::new(RecordingLauncher::default()),
        Arc::new(InMemoryCheckpointStore::new()),
    );
    assert!(matches!(result, Err(SequencerError::InvalidStartInput(_))));
}

#[tokio::test]
async fn test_dropping_handles_saves_final_checkpoint() {
    let launcher = Arc::new(RecordingLauncher::failing_first(usize::MAX));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (handle, task) =
        LedgerHandle::spawn(test_config(100), None, launcher, store.clone()).unwrap();

    handle.enqueue(details(1)).await.unwrap();
    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();

    let saved = store.load_latest().await.unwrap().unwrap();
    assert_eq!(saved.next_id, 2);
    assert_eq!(saved.pending_queue.len(), 1);
}
