//! In-memory Account Executor
//!
//! Keeps net balance changes per account. Stands in for a real account store
//! in the demo binary and in tests, with switches to simulate failing steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::executor::{AccountExecutor, AccountOp, ExecutorError};
use crate::core_types::{AccountId, Amount, ReferenceId};
use crate::substrate::heartbeat::ActivityContext;

/// Heartbeat cadence while a simulated withdraw is in progress
const HEARTBEAT_EVERY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AppliedKey {
    op: AccountOp,
    account_id: AccountId,
    reference_id: ReferenceId,
}

#[derive(Debug, Default)]
pub struct InMemoryAccountExecutor {
    /// Effects already applied, keyed for dedup; value is the amount
    applied: DashMap<AppliedKey, Amount>,
    /// Net change per account (credits minus debits)
    deltas: DashMap<AccountId, i128>,
    fail_withdraw: AtomicBool,
    fail_deposit: AtomicBool,
    fail_refund: AtomicBool,
    withdraw_latency: Duration,
}

impl InMemoryAccountExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated processing time of each withdraw; heartbeats while waiting
    pub fn with_withdraw_latency(mut self, latency: Duration) -> Self {
        self.withdraw_latency = latency;
        self
    }

    /// Make every call of `op` fail with a retryable error
    pub fn set_failing(&self, op: AccountOp, failing: bool) {
        self.switch(op).store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self, op: AccountOp) -> bool {
        self.switch(op).load(Ordering::SeqCst)
    }

    /// Net balance change of `account_id` so far
    pub fn balance_delta(&self, account_id: &str) -> i128 {
        self.deltas.get(account_id).map(|d| *d).unwrap_or(0)
    }

    /// Number of distinct effects applied
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    fn switch(&self, op: AccountOp) -> &AtomicBool {
        match op {
            AccountOp::Withdraw => &self.fail_withdraw,
            AccountOp::Deposit => &self.fail_deposit,
            AccountOp::Refund => &self.fail_refund,
        }
    }

    fn execute(
        &self,
        op: AccountOp,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
    ) -> Result<(), ExecutorError> {
        if self.is_failing(op) {
            info!(%op, account_id, %reference_id, "{} failed", op);
            return Err(ExecutorError::Retryable(format!(
                "Simulated failure during {} for account {}",
                op, account_id
            )));
        }

        let key = AppliedKey {
            op,
            account_id: account_id.to_string(),
            reference_id: reference_id.clone(),
        };
        match self.applied.entry(key) {
            Entry::Occupied(existing) if *existing.get() == amount => {
                debug!(%op, account_id, %reference_id, "Already applied, acknowledging again");
                Ok(())
            }
            Entry::Occupied(existing) => Err(ExecutorError::NonRetryable(format!(
                "reference {} already used for {} of {} on account {}",
                reference_id,
                op,
                existing.get(),
                account_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(amount);
                let signed = match op {
                    AccountOp::Withdraw => -(amount as i128),
                    AccountOp::Deposit | AccountOp::Refund => amount as i128,
                };
                *self.deltas.entry(account_id.to_string()).or_insert(0) += signed;
                info!(%op, account_id, %reference_id, amount, "Account updated");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl AccountExecutor for InMemoryAccountExecutor {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn withdraw(
        &self,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        ctx: ActivityContext,
    ) -> Result<(), ExecutorError> {
        ctx.heartbeat();
        let mut remaining = self.withdraw_latency;
        while !remaining.is_zero() {
            let step = remaining.min(HEARTBEAT_EVERY);
            tokio::time::sleep(step).await;
            remaining -= step;
            ctx.heartbeat();
        }
        self.execute(AccountOp::Withdraw, account_id, reference_id, amount)
    }

    async fn deposit(
        &self,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        _ctx: ActivityContext,
    ) -> Result<(), ExecutorError> {
        self.execute(AccountOp::Deposit, account_id, reference_id, amount)
    }

    async fn refund(
        &self,
        account_id: &str,
        reference_id: &ReferenceId,
        amount: Amount,
        _ctx: ActivityContext,
    ) -> Result<(), ExecutorError> {
        self.execute(AccountOp::Refund, account_id, reference_id, amount)
    }
}
