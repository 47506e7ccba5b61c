//! Ledger Sequencer
//!
//! Accepts transfer requests, assigns them strictly increasing ids, and
//! dispatches one transfer saga per record in enqueue order.
//!
//! # Lifecycle
//!
//! ```text
//! Enqueue ──▶ history + pending_queue ──▶ dispatch (await start ack) ──▶ ...
//!                                                  │
//!                        event_counter > event_limit or event log too large
//!                                                  ▼
//!                              checkpoint ──▶ successor instance
//! ```
//!
//! # Invariants
//!
//! 1. **No reuse**: `next_id` only grows, across checkpoints too
//! 2. **Append-only history**: history order is enqueue order
//! 3. **Single owner**: one instance at a time owns the state; handoff is atomic
//! 4. **Fail-safe checkpoint**: a failed checkpoint leaves the instance running

pub mod actor;
pub mod error;
pub mod launcher;
pub mod state;
pub mod stats;

#[cfg(test)]
mod integration_tests;

pub use actor::{LedgerHandle, LedgerStatus, SequencerConfig};
pub use error::SequencerError;
pub use launcher::{LaunchError, SagaLauncher, StartAck};
pub use state::{DEFAULT_EVENT_LIMIT, SequencerState, StartInput};
pub use stats::{LedgerStats, LedgerStatsSnapshot};
