//! Transfer Saga
//!
//! One saga per ledger record: withdraw from the source, deposit to the
//! destination, refund the source if the deposit cannot be made.
//!
//! # State Machine
//!
//! ```text
//! WITHDRAWING ──ok──▶ DEPOSITING ──ok──▶ SUCCESS
//!      │                   │
//!     fail                fail
//!      ▼                   ▼
//! UNRECOVERABLE       REFUNDING ──ok──▶ COMPENSATED_FAILURE
//!                          │
//!                         fail ──▶ UNRECOVERABLE (manual reconciliation)
//! ```
//!
//! A step "fails" only after its retry schedule is exhausted. Every executor
//! call carries the record id as reference id, which is what makes retries
//! safe at the executor.

pub mod error;
pub mod executor;
pub mod in_memory;
pub mod state;
pub mod workflow;


pub use error::SagaError;
pub use executor::{AccountExecutor, AccountOp, ExecutorError};
pub use in_memory::InMemoryAccountExecutor;
pub use state::{SagaOutcome, SagaState, SagaStep, Transition};
pub use workflow::{SagaOptions, SagaReport, TransferSaga};
