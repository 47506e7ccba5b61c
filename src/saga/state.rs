//! Transfer Saga State Definitions

use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

use crate::core_types::{ReferenceId, TransactionDetails};

/// Step the saga is currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub enum SagaStep {
    /// Debit the source account
    Withdrawing,
    /// Credit the destination account
    Depositing,
    /// Compensation: credit the source account back
    Refunding,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Withdrawing => "WITHDRAWING",
            SagaStep::Depositing => "DEPOSITING",
            SagaStep::Refunding => "REFUNDING",
        }
    }

    /// Where the saga goes when this step succeeds
    pub fn on_success(self) -> Transition {
        match self {
            SagaStep::Withdrawing => Transition::Next(SagaStep::Depositing),
            SagaStep::Depositing => Transition::Finish(SagaOutcome::Success),
            SagaStep::Refunding => Transition::Finish(SagaOutcome::CompensatedFailure),
        }
    }

    /// Where the saga goes when this step exhausts its retries
    pub fn on_failure(self) -> Transition {
        match self {
            // nothing moved yet
            SagaStep::Withdrawing => Transition::Finish(SagaOutcome::UnrecoverableFailure),
            SagaStep::Depositing => Transition::Next(SagaStep::Refunding),
            // debited, neither credited nor refunded
            SagaStep::Refunding => Transition::Finish(SagaOutcome::UnrecoverableFailure),
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub enum SagaOutcome {
    Pending,
    /// Terminal: funds moved
    Success,
    /// Terminal: deposit failed, source refunded
    CompensatedFailure,
    /// Terminal: needs manual reconciliation if the withdraw went through
    UnrecoverableFailure,
}

impl SagaOutcome {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SagaOutcome::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaOutcome::Pending => "PENDING",
            SagaOutcome::Success => "SUCCESS",
            SagaOutcome::CompensatedFailure => "COMPENSATED_FAILURE",
            SagaOutcome::UnrecoverableFailure => "UNRECOVERABLE_FAILURE",
        }
    }
}

impl fmt::Display for SagaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(SagaStep),
    Finish(SagaOutcome),
}

/// Per-transfer saga state, owned by the saga process alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaState {
    pub reference_id: ReferenceId,
    pub transaction_details: TransactionDetails,
    pub current_step: SagaStep,
    pub outcome: SagaOutcome,
}

impl SagaState {
    pub fn new(reference_id: ReferenceId, transaction_details: TransactionDetails) -> Self {
        Self {
            reference_id,
            transaction_details,
            current_step: SagaStep::Withdrawing,
            outcome: SagaOutcome::Pending,
        }
    }

    /// Apply the result of the current step.
    ///
    /// On a terminal transition `current_step` keeps the last executed step.
    pub fn apply(&mut self, succeeded: bool) -> Transition {
        let transition = if succeeded {
            self.current_step.on_success()
        } else {
            self.current_step.on_failure()
        };
        match transition {
            Transition::Next(step) => self.current_step = step,
            Transition::Finish(outcome) => self.outcome = outcome,
        }
        transition
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_terminal()
    }
}
