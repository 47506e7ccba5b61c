use std::time::Instant;

use crate::sequencer::LedgerHandle;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    /// Entry point to the ledger sequencer
    pub ledger: LedgerHandle,
    started_at: Instant,
}

impl AppState {
    pub fn new(ledger: LedgerHandle) -> Self {
        Self {
            ledger,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
