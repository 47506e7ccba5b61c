//! Transfer Ledger
//!
//! A durable, ordered ledger of money-transfer requests. Each request is
//! executed as a compensating saga against an account executor.
//!
//! # Modules
//!
//! - [`core_types`] - TransactionDetails, LedgerRecord, ids
//! - [`sequencer`] - Ledger Sequencer: ids, history, dispatch, checkpoints
//! - [`saga`] - Transfer Saga: withdraw → deposit (→ refund)
//! - [`substrate`] - retries, heartbeats, checkpoint store, saga host
//! - [`gateway`] - HTTP surface
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup

// Core types - must be first!
pub mod core_types;

pub mod saga;
pub mod sequencer;
pub mod substrate;

pub mod config;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{AccountId, Amount, LedgerRecord, ProcessId, ReferenceId, SeqNum, TransactionDetails};
pub use saga::{AccountExecutor, InMemoryAccountExecutor, SagaOutcome, SagaReport, TransferSaga};
pub use sequencer::{LedgerHandle, SequencerConfig, StartInput};
pub use substrate::{CheckpointStore, SagaHost};
