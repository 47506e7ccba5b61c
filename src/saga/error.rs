//! Saga Error Types
//!
//! The terminal failure signal of a transfer saga. Step-level transient
//! failures are retried inside the step and never show up here.

use thiserror::Error;

use crate::core_types::AccountId;
use crate::substrate::retry::StepFailure;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SagaError {
    /// Nothing was moved
    #[error("Withdraw from {account} failed: {cause}")]
    WithdrawFailed {
        account: AccountId,
        cause: StepFailure,
    },

    /// Source debited, destination not credited, refund failed.
    /// Requires manual reconciliation.
    #[error(
        "Compensation failed: {source_account} debited, deposit to {destination} failed ({deposit}), refund failed ({refund})"
    )]
    CompensationFailure {
        source_account: AccountId,
        destination: AccountId,
        deposit: StepFailure,
        refund: StepFailure,
    },
}

impl SagaError {
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::WithdrawFailed { .. } => "WITHDRAW_FAILED",
            SagaError::CompensationFailure { .. } => "COMPENSATION_FAILURE",
        }
    }

    /// Funds are debited with no matching credit or refund
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, SagaError::CompensationFailure { .. })
    }
}
