//! Saga launch seam
//!
//! The sequencer never runs a transfer itself. It asks a [`SagaLauncher`] to
//! start one detached process per record and only waits for the start
//! acknowledgement, never for the transfer to finish.

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{LedgerRecord, ProcessId};

/// Acknowledgement that a process for the record exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAck {
    /// A new process was started
    Started(ProcessId),
    /// A process with this id already existed (re-dispatch after a checkpoint)
    AlreadyStarted(ProcessId),
}

impl StartAck {
    pub fn process_id(&self) -> &ProcessId {
        match self {
            StartAck::Started(id) | StartAck::AlreadyStarted(id) => id,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Saga host is shut down")]
    HostShutdown,

    #[error("Process {0} did not confirm its start")]
    NotStarted(ProcessId),
}

impl LaunchError {
    pub fn code(&self) -> &'static str {
        match self {
            LaunchError::HostShutdown => "HOST_SHUTDOWN",
            LaunchError::NotStarted(_) => "NOT_STARTED",
        }
    }
}

/// Starts a detached transfer process for a ledger record
#[async_trait]
pub trait SagaLauncher: Send + Sync {
    /// Resolves once the process is confirmed started.
    ///
    /// Must be idempotent per `record.process_id()`.
    async fn launch(&self, record: LedgerRecord) -> Result<StartAck, LaunchError>;
}
