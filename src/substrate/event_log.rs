//! Event-log size advisory
//!
//! Every update handled by a hosted process appends to that process's event
//! log. When the log grows past a soft limit the substrate advises the process
//! to checkpoint, which starts a new, empty log.

use tracing::trace;

/// Default number of events after which a checkpoint is suggested
pub const DEFAULT_SOFT_LIMIT: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    UpdateAccepted,
    ChildStarted,
    ChildStartFailed,
}

/// Per-instance event counter
#[derive(Debug, Clone)]
pub struct EventLog {
    len: u64,
    soft_limit: u64,
}

impl EventLog {
    pub fn new(soft_limit: u64) -> Self {
        Self { len: 0, soft_limit }
    }

    pub fn record(&mut self, kind: EventKind) {
        self.len += 1;
        trace!(?kind, len = self.len, "Event appended");
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Advisory: true once the log reached its soft limit
    pub fn checkpoint_suggested(&self) -> bool {
        self.len >= self.soft_limit
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_SOFT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggests_checkpoint_at_soft_limit() {
        let mut log = EventLog::new(3);
        assert!(log.is_empty());
        log.record(EventKind::UpdateAccepted);
        log.record(EventKind::ChildStarted);
        assert!(!log.checkpoint_suggested());
        log.record(EventKind::UpdateAccepted);
        assert_eq!(log.len(), 3);
        assert!(log.checkpoint_suggested());
    }
}
