//! Ledger Sequencer State
//!
//! Pure, synchronous state of one sequencer instance. The actor owns exactly
//! one `SequencerState`; nothing else reads or writes it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::error::SequencerError;
use crate::core_types::{LedgerRecord, SeqNum, TransactionDetails};

/// Updates handled per instance before a checkpoint is taken
pub const DEFAULT_EVENT_LIMIT: u64 = 3;

/// State carried from one sequencer instance to its successor.
///
/// Also the externally supplied initial state of a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInput {
    pub history: Vec<LedgerRecord>,
    pub next_id: SeqNum,
    pub pending_queue: VecDeque<LedgerRecord>,
    pub event_limit: u64,
}

impl StartInput {
    /// Empty ledger whose first record gets id "1"
    pub fn fresh(event_limit: u64) -> Self {
        Self {
            history: Vec::new(),
            next_id: 1,
            pending_queue: VecDeque::new(),
            event_limit,
        }
    }

    /// Check the ordering invariants an instance relies on.
    ///
    /// - history ids are strictly increasing decimal integers below `next_id`
    /// - every pending record is in history, in history order
    pub fn validate(&self) -> Result<(), SequencerError> {
        if self.next_id == 0 {
            return Err(SequencerError::InvalidStartInput(
                "next_id must start at 1".into(),
            ));
        }

        let mut previous: SeqNum = 0;
        for record in &self.history {
            let seq: SeqNum = record.id.parse().map_err(|_| {
                SequencerError::InvalidStartInput(format!("record id {:?} is not a number", record.id))
            })?;
            if seq <= previous {
                return Err(SequencerError::InvalidStartInput(format!(
                    "record id {} out of order after {}",
                    seq, previous
                )));
            }
            if seq >= self.next_id {
                return Err(SequencerError::InvalidStartInput(format!(
                    "record id {} not below next_id {}",
                    seq, self.next_id
                )));
            }
            previous = seq;
        }

        let mut cursor = self.history.iter();
        for pending in &self.pending_queue {
            if !cursor.any(|record| record == pending) {
                return Err(SequencerError::InvalidStartInput(format!(
                    "pending record {} missing from history or out of order",
                    pending.id
                )));
            }
        }

        Ok(())
    }

    /// Append journaled records; returns how many were new.
    ///
    /// Records below `next_id` are already covered and skipped. The rest must
    /// continue the id sequence without gaps; each lands in history and at
    /// the back of the pending queue.
    pub fn replay(
        &mut self,
        records: impl IntoIterator<Item = LedgerRecord>,
    ) -> Result<usize, SequencerError> {
        let mut replayed = 0;
        for record in records {
            let seq: SeqNum = record.id.parse().map_err(|_| {
                SequencerError::InvalidStartInput(format!("journaled id {:?} is not a number", record.id))
            })?;
            if seq < self.next_id {
                continue;
            }
            if seq != self.next_id {
                return Err(SequencerError::InvalidStartInput(format!(
                    "journal gap: expected record {}, found {}",
                    self.next_id, seq
                )));
            }
            self.history.push(record.clone());
            self.pending_queue.push_back(record);
            self.next_id += 1;
            replayed += 1;
        }
        Ok(replayed)
    }
}

/// Live state of one sequencer instance
#[derive(Debug, Clone)]
pub struct SequencerState {
    history: Vec<LedgerRecord>,
    next_id: SeqNum,
    pending_queue: VecDeque<LedgerRecord>,
    event_limit: u64,
    /// Updates handled since this instance started
    event_counter: u64,
}

impl SequencerState {
    pub fn new(event_limit: u64) -> Self {
        Self::from_start_input(StartInput::fresh(event_limit))
    }

    /// Seed an instance from carried-over state; the event counter starts at zero
    pub fn from_start_input(input: StartInput) -> Self {
        Self {
            history: input.history,
            next_id: input.next_id,
            pending_queue: input.pending_queue,
            event_limit: input.event_limit,
            event_counter: 0,
        }
    }

    /// The record the next accepted request becomes; nothing changes until [`accept`].
    ///
    /// [`accept`]: SequencerState::accept
    pub fn next_record(&self, transaction_details: TransactionDetails) -> LedgerRecord {
        LedgerRecord::new(self.next_id, transaction_details)
    }

    /// Commit a record from [`next_record`]: consume its id, record it, queue it.
    ///
    /// [`next_record`]: SequencerState::next_record
    pub fn accept(&mut self, record: LedgerRecord) {
        self.event_counter += 1;
        self.next_id += 1;
        self.pending_queue.push_back(record.clone());
        self.history.push(record);
    }

    /// Copy of the full history in id order
    pub fn history(&self) -> Vec<LedgerRecord> {
        self.history.clone()
    }

    /// Remove the oldest record awaiting dispatch
    pub fn pop_pending(&mut self) -> Option<LedgerRecord> {
        self.pending_queue.pop_front()
    }

    /// Put a record whose dispatch failed back at the head of the queue
    pub fn requeue_front(&mut self, record: LedgerRecord) {
        self.pending_queue.push_front(record);
    }

    pub fn event_limit_exceeded(&self) -> bool {
        self.event_counter > self.event_limit
    }

    /// State handed to the successor instance
    pub fn checkpoint(&self) -> StartInput {
        StartInput {
            history: self.history.clone(),
            next_id: self.next_id,
            pending_queue: self.pending_queue.clone(),
            event_limit: self.event_limit,
        }
    }

    pub fn next_id(&self) -> SeqNum {
        self.next_id
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_queue.len()
    }

    pub fn event_limit(&self) -> u64 {
        self.event_limit
    }

    pub fn event_counter(&self) -> u64 {
        self.event_counter
    }
}
