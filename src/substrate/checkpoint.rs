//! Checkpoint persistence
//!
//! A checkpoint is the full [`StartInput`] of a sequencer's successor. The
//! store must accept it before the old instance hands over; if it cannot,
//! the old instance keeps running.
//!
//! Records accepted between checkpoints go to a journal first, so recovery is
//! latest checkpoint + journal replay. A successful checkpoint covers the
//! whole journal, which is then truncated.
//!
//! On-disk layout of [`FileCheckpointStore`]:
//!
//! ```text
//! <dir>/
//!   checkpoint-<ts>-<next_id>/
//!     state.json       StartInput
//!     metadata.json    CheckpointMetadata (crc32 of state.json)
//!     COMPLETE
//!   LATEST             name of the newest complete checkpoint
//!   journal.log        crc32-framed records since that checkpoint
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::journal::{self, JOURNAL_FILE};
use crate::core_types::LedgerRecord;
use crate::sequencer::StartInput;

const FORMAT_VERSION: u32 = 1;
const STATE_FILE: &str = "state.json";
const METADATA_FILE: &str = "metadata.json";
const COMPLETE_MARKER: &str = "COMPLETE";
const LATEST_FILE: &str = "LATEST";
/// Complete checkpoints retained on disk
const RETAINED: usize = 2;

/// The checkpoint handoff could not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {0}")]
    Io(String),

    #[error("Checkpoint serialization error: {0}")]
    Serialize(String),

    #[error("Checkpoint corrupt: {0}")]
    Corrupt(String),
}

impl CheckpointError {
    pub fn code(&self) -> &'static str {
        match self {
            CheckpointError::Io(_) => "CHECKPOINT_IO",
            CheckpointError::Serialize(_) => "CHECKPOINT_SERIALIZE",
            CheckpointError::Corrupt(_) => "CHECKPOINT_CORRUPT",
        }
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        CheckpointError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialize(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub next_id: u64,
    pub history_len: usize,
    pub pending_len: usize,
    pub event_limit: u64,
    pub state_checksum: String,
    pub created_at: DateTime<Utc>,
}

impl CheckpointMetadata {
    fn describe(input: &StartInput, state_checksum: String) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            next_id: input.next_id,
            history_len: input.history.len(),
            pending_len: input.pending_queue.len(),
            event_limit: input.event_limit,
            state_checksum,
            created_at: Utc::now(),
        }
    }
}

/// Durable home of sequencer checkpoints and the journal between them
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint; success means the successor may take over.
    /// Everything journaled so far is covered by it.
    async fn save(&self, input: &StartInput) -> Result<CheckpointMetadata, CheckpointError>;

    /// Most recent complete checkpoint, if any
    async fn load_latest(&self) -> Result<Option<StartInput>, CheckpointError>;

    /// Make one accepted record durable; returns once it survives a crash
    async fn append(&self, record: &LedgerRecord) -> Result<(), CheckpointError>;

    /// Records appended since the latest checkpoint, in append order
    async fn journaled(&self) -> Result<Vec<LedgerRecord>, CheckpointError>;

    /// Latest checkpoint with the journal replayed on top.
    ///
    /// `event_limit` only applies when there is a journal but no checkpoint.
    async fn recover(&self, event_limit: u64) -> Result<Option<StartInput>, CheckpointError> {
        let checkpoint = self.load_latest().await?;
        let records = self.journaled().await?;
        if checkpoint.is_none() && records.is_empty() {
            return Ok(None);
        }

        let mut input = checkpoint.unwrap_or_else(|| StartInput::fresh(event_limit));
        let replayed = input
            .replay(records)
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;
        if replayed > 0 {
            info!(replayed, next_id = input.next_id, "Journal replayed");
        }
        Ok(Some(input))
    }
}

/// Keeps only the latest checkpoint, in memory
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    latest: Mutex<Option<StartInput>>,
    journal: Mutex<Vec<LedgerRecord>>,
    saved: Mutex<u64>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints accepted so far
    pub fn saved_count(&self) -> u64 {
        self.saved.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, input: &StartInput) -> Result<CheckpointMetadata, CheckpointError> {
        let bytes = serde_json::to_vec(input)?;
        let metadata = CheckpointMetadata::describe(input, checksum(&bytes));
        {
            let mut latest = self
                .latest
                .lock()
                .map_err(|_| CheckpointError::Io("checkpoint slot poisoned".into()))?;
            *latest = Some(input.clone());
        }
        if let Ok(mut journal) = self.journal.lock() {
            journal.clear();
        }
        if let Ok(mut saved) = self.saved.lock() {
            *saved += 1;
        }
        Ok(metadata)
    }

    async fn load_latest(&self) -> Result<Option<StartInput>, CheckpointError> {
        let latest = self
            .latest
            .lock()
            .map_err(|_| CheckpointError::Io("checkpoint slot poisoned".into()))?;
        Ok(latest.clone())
    }

    async fn append(&self, record: &LedgerRecord) -> Result<(), CheckpointError> {
        self.journal
            .lock()
            .map_err(|_| CheckpointError::Io("journal poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    async fn journaled(&self) -> Result<Vec<LedgerRecord>, CheckpointError> {
        let journal = self
            .journal
            .lock()
            .map_err(|_| CheckpointError::Io("journal poisoned".into()))?;
        Ok(journal.clone())
    }
}

/// Checkpoints as JSON directories, written atomically, plus a journal file
pub struct FileCheckpointStore {
    dir: PathBuf,
    /// Open append handle; `None` until the first append after open/truncate
    journal: tokio::sync::Mutex<Option<File>>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            journal: tokio::sync::Mutex::new(None),
        }
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    async fn write_checkpoint_dir(
        &self,
        tmp_dir: &Path,
        state_bytes: &[u8],
        metadata: &CheckpointMetadata,
    ) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(tmp_dir).await?;
        tokio::fs::write(tmp_dir.join(STATE_FILE), state_bytes).await?;
        tokio::fs::write(
            tmp_dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(metadata)?,
        )
        .await?;
        tokio::fs::write(tmp_dir.join(COMPLETE_MARKER), b"").await?;
        Ok(())
    }

    /// Empty the journal once a checkpoint covers it.
    ///
    /// Failure is harmless: replay skips records the checkpoint already holds.
    async fn truncate_journal(&self) {
        let mut slot = self.journal.lock().await;
        *slot = None;
        let result = async {
            let file = File::create(self.journal_path()).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to truncate journal after checkpoint");
        }
    }

    async fn write_latest_pointer(&self, name: &str) -> Result<(), CheckpointError> {
        let tmp = self.dir.join(format!(".{}.tmp", LATEST_FILE));
        tokio::fs::write(&tmp, name).await?;
        tokio::fs::rename(&tmp, self.dir.join(LATEST_FILE)).await?;
        Ok(())
    }

    /// Drop old checkpoints and leftover tmp dirs of failed saves
    async fn prune(&self, keep: &str) -> Result<(), CheckpointError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("checkpoint-") {
                names.push(name);
            } else if name.starts_with(".tmp-checkpoint-") {
                debug!(dir = %name, "Removing stale checkpoint tmp dir");
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }
        // zero-padded timestamps sort chronologically
        names.sort();
        let excess = names.len().saturating_sub(RETAINED);
        for name in names.into_iter().take(excess) {
            if name == keep {
                continue;
            }
            debug!(checkpoint = %name, "Pruning old checkpoint");
            tokio::fs::remove_dir_all(self.dir.join(&name)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    /// Protocol:
    /// 1. Write state + metadata + COMPLETE into a hidden tmp dir
    /// 2. Rename tmp dir to `checkpoint-<ts>-<next_id>`
    /// 3. Atomically repoint LATEST
    /// 4. Truncate the journal
    /// 5. Prune older checkpoints
    async fn save(&self, input: &StartInput) -> Result<CheckpointMetadata, CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let state_bytes = serde_json::to_vec_pretty(input)?;
        let metadata = CheckpointMetadata::describe(input, checksum(&state_bytes));
        let name = format!(
            "checkpoint-{:020}-{}",
            metadata.created_at.timestamp_micros(),
            metadata.next_id
        );

        let tmp_dir = self.dir.join(format!(".tmp-{}", name));
        let written = match self
            .write_checkpoint_dir(&tmp_dir, &state_bytes, &metadata)
            .await
        {
            Ok(()) => tokio::fs::rename(&tmp_dir, self.dir.join(&name))
                .await
                .map_err(CheckpointError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&tmp_dir).await {
                debug!(error = %cleanup, "Could not remove checkpoint tmp dir");
            }
            return Err(e);
        }
        self.write_latest_pointer(&name).await?;
        self.truncate_journal().await;

        if let Err(e) = self.prune(&name).await {
            warn!(error = %e, "Failed to prune old checkpoints");
        }

        info!(
            checkpoint = %name,
            next_id = metadata.next_id,
            history_len = metadata.history_len,
            pending = metadata.pending_len,
            "Checkpoint written"
        );
        Ok(metadata)
    }

    async fn load_latest(&self) -> Result<Option<StartInput>, CheckpointError> {
        let latest = match tokio::fs::read_to_string(self.dir.join(LATEST_FILE)).await {
            Ok(name) => name.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint_dir = self.dir.join(&latest);
        if !tokio::fs::try_exists(checkpoint_dir.join(COMPLETE_MARKER)).await? {
            return Err(CheckpointError::Corrupt(format!(
                "{} has no COMPLETE marker",
                latest
            )));
        }

        let metadata: CheckpointMetadata =
            serde_json::from_slice(&tokio::fs::read(checkpoint_dir.join(METADATA_FILE)).await?)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(CheckpointError::Corrupt(format!(
                "unsupported format version {}",
                metadata.format_version
            )));
        }

        let state_bytes = tokio::fs::read(checkpoint_dir.join(STATE_FILE)).await?;
        if checksum(&state_bytes) != metadata.state_checksum {
            return Err(CheckpointError::Corrupt(format!(
                "{} checksum mismatch",
                latest
            )));
        }

        let input: StartInput = serde_json::from_slice(&state_bytes)?;
        input
            .validate()
            .map_err(|e| CheckpointError::Corrupt(e.to_string()))?;

        info!(
            checkpoint = %latest,
            next_id = input.next_id,
            history_len = input.history.len(),
            pending = input.pending_queue.len(),
            "Checkpoint loaded"
        );
        Ok(Some(input))
    }

    async fn append(&self, record: &LedgerRecord) -> Result<(), CheckpointError> {
        let frame = journal::encode(record)?;

        let mut slot = self.journal.lock().await;
        if slot.is_none() {
            tokio::fs::create_dir_all(&self.dir).await?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.journal_path())
                .await?;
            *slot = Some(file);
        }
        let Some(file) = slot.as_mut() else {
            return Err(CheckpointError::Io("journal not open".into()));
        };

        let before = file.metadata().await?.len();
        let written = async {
            file.write_all(&frame).await?;
            file.sync_data().await
        }
        .await;
        if let Err(e) = written {
            // a partial frame must not sit in front of the next append
            if let Err(cut) = file.set_len(before).await {
                error!(error = %cut, "Failed to cut partial journal frame");
            }
            *slot = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn journaled(&self) -> Result<Vec<LedgerRecord>, CheckpointError> {
        let mut slot = self.journal.lock().await;
        *slot = None;

        let path = self.journal_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let decoded = journal::decode(&bytes)?;
        let torn = decoded.torn_bytes(bytes.len());
        if torn > 0 {
            warn!(torn_bytes = torn, "Cutting torn journal tail");
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(decoded.valid_len as u64).await?;
            file.sync_all().await?;
        }
        Ok(decoded.records)
    }
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(bytes))
}
