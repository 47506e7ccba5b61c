//! Transfer Saga driver
//!
//! Runs one transfer through withdraw → deposit (→ refund) against an
//! [`AccountExecutor`], each step under its own retry schedule.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, error, info, info_span, warn};

use super::error::SagaError;
use super::executor::{AccountExecutor, AccountOp};
use super::state::{SagaOutcome, SagaState, SagaStep, Transition};
use crate::core_types::{LedgerRecord, ProcessId, ReferenceId, TransactionDetails};
use crate::substrate::retry::{ActivityOptions, StepFailure, run_activity};

/// Retry and timeout settings for every saga step
#[derive(Debug, Clone, PartialEq)]
pub struct SagaOptions {
    /// Applied to every step
    pub activity: ActivityOptions,
    /// Heartbeat timeout, withdraw step only
    pub withdraw_heartbeat: Duration,
}

impl Default for SagaOptions {
    fn default() -> Self {
        Self {
            activity: ActivityOptions::default(),
            withdraw_heartbeat: Duration::from_secs(5),
        }
    }
}

impl SagaOptions {
    pub fn for_operation(&self, op: AccountOp) -> ActivityOptions {
        let options = self.activity.clone();
        match op {
            AccountOp::Withdraw => options.with_heartbeat_timeout(self.withdraw_heartbeat),
            AccountOp::Deposit | AccountOp::Refund => options,
        }
    }
}

/// Terminal report of one saga; the operator-facing failure signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaReport {
    pub process_id: ProcessId,
    pub reference_id: ReferenceId,
    pub transaction_details: TransactionDetails,
    pub outcome: SagaOutcome,
    /// Steps that exhausted their retries, in execution order
    pub failed_steps: Vec<(SagaStep, StepFailure)>,
    pub error: Option<SagaError>,
}

impl SagaReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SagaOutcome::Success
    }
}

/// One transfer saga instance
pub struct TransferSaga {
    process_id: ProcessId,
    state: SagaState,
    executor: Arc<dyn AccountExecutor>,
    options: SagaOptions,
}

impl TransferSaga {
    pub fn new(
        record: &LedgerRecord,
        executor: Arc<dyn AccountExecutor>,
        options: SagaOptions,
    ) -> Self {
        Self {
            process_id: record.process_id(),
            state: SagaState::new(record.reference_id(), record.transaction_details.clone()),
            executor,
            options,
        }
    }

    /// Drive the saga to a terminal outcome
    pub async fn run(self) -> SagaReport {
        let span = info_span!(
            "saga",
            reference_id = %self.state.reference_id,
            process_id = %self.process_id
        );
        self.drive().instrument(span).await
    }

    async fn drive(mut self) -> SagaReport {
        let details = self.state.transaction_details.clone();
        info!(
            source = %details.source_account_id,
            destination = %details.destination_account_id,
            amount = details.amount,
            executor = self.executor.name(),
            "Transfer saga running"
        );

        let mut failed_steps = Vec::new();
        loop {
            let step = self.state.current_step;
            let result = self.execute(step).await;
            let succeeded = result.is_ok();
            if let Err(failure) = result {
                warn!(%step, code = failure.code(), error = %failure, "Saga step failed");
                failed_steps.push((step, failure));
            }

            match self.state.apply(succeeded) {
                Transition::Next(next) => {
                    info!(from = %step, to = %next, "Saga transition");
                }
                Transition::Finish(outcome) => {
                    info!(from = %step, to = %outcome, "Saga finished");
                    break;
                }
            }
        }

        let error = self.terminal_error(&failed_steps);
        match (&self.state.outcome, &error) {
            (SagaOutcome::Success, _) => info!("Transfer completed"),
            (SagaOutcome::CompensatedFailure, _) => {
                warn!("Transfer did not happen, source refunded")
            }
            (_, Some(e)) if e.needs_reconciliation() => {
                error!(code = e.code(), error = %e, "Transfer needs manual reconciliation")
            }
            (outcome, _) => warn!(%outcome, "Transfer failed, no funds moved"),
        }

        SagaReport {
            process_id: self.process_id,
            reference_id: self.state.reference_id,
            transaction_details: self.state.transaction_details,
            outcome: self.state.outcome,
            failed_steps,
            error,
        }
    }

    async fn execute(&self, step: SagaStep) -> Result<(), StepFailure> {
        let details = &self.state.transaction_details;
        let (op, account_id) = match step {
            SagaStep::Withdrawing => (AccountOp::Withdraw, details.source_account_id.as_str()),
            SagaStep::Depositing => (AccountOp::Deposit, details.destination_account_id.as_str()),
            SagaStep::Refunding => (AccountOp::Refund, details.source_account_id.as_str()),
        };
        let options = self.options.for_operation(op);
        let executor = self.executor.as_ref();
        let reference_id = &self.state.reference_id;
        let amount = details.amount;

        run_activity(op.as_str(), &options, |ctx| {
            executor.apply(op, account_id, reference_id, amount, ctx)
        })
        .await
    }

    fn terminal_error(&self, failed_steps: &[(SagaStep, StepFailure)]) -> Option<SagaError> {
        let failure_of = |step: SagaStep| {
            failed_steps
                .iter()
                .find(|(failed, _)| *failed == step)
                .map(|(_, failure)| failure.clone())
        };
        let details = &self.state.transaction_details;

        match (self.state.outcome, self.state.current_step) {
            (SagaOutcome::UnrecoverableFailure, SagaStep::Withdrawing) => {
                Some(SagaError::WithdrawFailed {
                    account: details.source_account_id.clone(),
                    cause: failure_of(SagaStep::Withdrawing)?,
                })
            }
            (SagaOutcome::UnrecoverableFailure, SagaStep::Refunding) => {
                Some(SagaError::CompensationFailure {
                    source_account: details.source_account_id.clone(),
                    destination: details.destination_account_id.clone(),
                    deposit: failure_of(SagaStep::Depositing)?,
                    refund: failure_of(SagaStep::Refunding)?,
                })
            }
            _ => None,
        }
    }
}
