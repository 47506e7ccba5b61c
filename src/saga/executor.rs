//! Account Executor contract
//!
//! The executor performs the real account mutations. The saga does no
//! idempotency bookkeeping of its own.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{Amount, ReferenceId};
use crate::substrate::heartbeat::ActivityContext;
use crate::substrate::retry::AttemptError;

/// Account mutation performed by one saga step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountOp {
    Withdraw,
    Deposit,
    Refund,
}

impl AccountOp {
    /// Activity name used in logs and retry bookkeeping
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountOp::Withdraw => "Withdraw",
            AccountOp::Deposit => "Deposit",
            AccountOp::Refund => "Refund",
        }
    }
}

impl fmt::Display for AccountOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one executor call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Worth another attempt (timeouts, temporary unavailability)
    #[error("{0}")]
    Retryable(String),

    /// Retrying cannot help (unknown account, conflicting reuse of a reference)
    #[error("{0}")]
    NonRetryable(String),
}

impl ExecutorError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::Retryable(_) => "EXECUTOR_RETRYABLE",
            ExecutorError::NonRetryable(_) => "EXECUTOR_REJECTED",
        }
    }
}

impl From<ExecutorError> for AttemptError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Retryable(message) => AttemptError::Failed {
                message,
                retryable: true,
            },
            ExecutorError::NonRetryable(message) => AttemptError::Failed {
                message,
                retryable: false,
            },
        }
    }
}

/// Account executor trait
///
/// All methods MUST be idempotent per `(account_id, reference_id)`: the saga
/// retries calls whose earlier attempt may have succeeded with the
/// acknowledgement lost.
#[async_trait]
pub trait AccountExecutor: Send + Sync {
    /// Executor name for logging
    fn name(&self) -> &'static str;

    /// Debit `amount` from `account_id`.
    ///
    /// Long-running implementations must call `ctx.heartbeat()` periodically.
    async fn withdraw(
        &self,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        ctx: ActivityContext,
    ) -> Result<(), ExecutorError>;

    /// Credit `amount` to `account_id`
    async fn deposit(
        &self,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        ctx: ActivityContext,
    ) -> Result<(), ExecutorError>;

    /// Credit a previously withdrawn `amount` back to `account_id`
    async fn refund(
        &self,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        ctx: ActivityContext,
    ) -> Result<(), ExecutorError>;

    async fn apply(
        &self,
        op: AccountOp,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        ctx: ActivityContext,
    ) -> Result<(), ExecutorError> {
        match op {
            AccountOp::Withdraw => self.withdraw(account_id, reference_id, amount, ctx).await,
            AccountOp::Deposit => self.deposit(account_id, reference_id, amount, ctx).await,
            AccountOp::Refund => self.refund(account_id, reference_id, amount, ctx).await,
        }
    }
}
