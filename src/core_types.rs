//! Core types used throughout the system
//!
//! Immutable values shared by the sequencer, the saga and the gateway.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Account identifier as understood by the account executor.
pub type AccountId = String;

/// Amount in the smallest indivisible unit. Never negative.
pub type Amount = u64;

/// Sequence number assigned by the ledger sequencer.
pub type SeqNum = u64;

/// What a caller asks the ledger to move.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    #[schema(example = "123")]
    pub source_account_id: AccountId,
    #[schema(example = "456")]
    pub destination_account_id: AccountId,
    #[schema(example = 42)]
    pub amount: Amount,
}

impl TransactionDetails {
    pub fn new(
        source_account_id: impl Into<AccountId>,
        destination_account_id: impl Into<AccountId>,
        amount: Amount,
    ) -> Self {
        Self {
            source_account_id: source_account_id.into(),
            destination_account_id: destination_account_id.into(),
            amount,
        }
    }
}

/// One accepted transfer request.
///
/// The id is the decimal form of the sequence number. It doubles as the
/// saga's reference id and the dedup key at the account executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    #[schema(example = "1")]
    pub id: String,
    pub transaction_details: TransactionDetails,
}

impl LedgerRecord {
    pub fn new(seq: SeqNum, transaction_details: TransactionDetails) -> Self {
        Self {
            id: seq.to_string(),
            transaction_details,
        }
    }

    /// Reference id carried on every account executor call
    pub fn reference_id(&self) -> ReferenceId {
        ReferenceId(self.id.clone())
    }

    /// Deterministic identity of the saga process for this record
    pub fn process_id(&self) -> ProcessId {
        ProcessId::for_transfer(&self.id)
    }
}

/// Reference id passed to the account executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceId(String);

impl ReferenceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a hosted saga process.
///
/// Derived only from the ledger record id, so dispatching the same record
/// twice names the same process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(String);

impl ProcessId {
    const TRANSFER_PREFIX: &'static str = "transfer:";

    pub fn for_transfer(record_id: &str) -> Self {
        Self(format!("{}{}", Self::TRANSFER_PREFIX, record_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
