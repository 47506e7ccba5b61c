//! In-process execution substrate
//!
//! What the sequencer and the saga need from their host:
//!
//! - **retry**: per-step retry schedule with attempt and step deadlines
//! - **heartbeat**: liveness signals for long-running steps
//! - **event_log**: the "checkpoint now" advisory
//! - **checkpoint**: durable handoff of sequencer state
//! - **journal**: crc32-framed records accepted since the last checkpoint
//! - **host**: detached, deduplicated saga processes

pub mod checkpoint;
pub mod event_log;
pub mod heartbeat;
pub mod host;
pub mod journal;
pub mod retry;

pub use checkpoint::{
    CheckpointError, CheckpointMetadata, CheckpointStore, FileCheckpointStore,
    InMemoryCheckpointStore,
};
pub use heartbeat::ActivityContext;
pub use host::{DEFAULT_FINISHED_RETENTION, ProcessStatus, SagaHost};
pub use retry::{ActivityOptions, AttemptError, RetryPolicy, StepFailure, run_activity};
