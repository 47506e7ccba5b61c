//! Sequencer Error Types

use thiserror::Error;

/// Errors surfaced to callers of the ledger sequencer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequencerError {
    /// The request could not be delivered (actor stopped or reply lost).
    /// The caller may retry; a retried `enqueue` can create a duplicate record.
    #[error("Ledger sequencer unavailable")]
    Unavailable,

    /// The record could not be made durable and was not accepted; safe to retry.
    #[error("Transfer request not recorded: {0}")]
    NotRecorded(String),

    #[error("Checkpoint failed: {0}")]
    CheckpointFailed(String),

    #[error("Invalid start input: {0}")]
    InvalidStartInput(String),
}

impl SequencerError {
    pub fn code(&self) -> &'static str {
        match self {
            SequencerError::Unavailable => "SEQUENCER_UNAVAILABLE",
            SequencerError::NotRecorded(_) => "RECORD_NOT_DURABLE",
            SequencerError::CheckpointFailed(_) => "CHECKPOINT_FAILED",
            SequencerError::InvalidStartInput(_) => "INVALID_START_INPUT",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SequencerError::Unavailable | SequencerError::NotRecorded(_) => 503,
            SequencerError::CheckpointFailed(_) | SequencerError::InvalidStartInput(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SequencerError::Unavailable.code(), "SEQUENCER_UNAVAILABLE");
        assert_eq!(SequencerError::Unavailable.http_status(), 503);
        assert_eq!(
            SequencerError::CheckpointFailed("disk full".into()).to_string(),
            "Checkpoint failed: disk full"
        );
    }
}
