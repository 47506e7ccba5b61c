//! Ledger journal framing
//!
//! Records accepted since the latest checkpoint, one frame each, appended
//! before the caller sees the record.
//!
//! # Frame Layout (16-byte header + JSON payload)
//!
//! ```text
//! ┌────────────┬─────────┬──────────────────────────────┐
//! │ seq_id     │ 8 bytes │ ledger id of the record (LE) │
//! │ payload_len│ 4 bytes │ payload size (LE)            │
//! │ checksum   │ 4 bytes │ CRC32 of payload (LE)        │
//! │ payload    │ N bytes │ LedgerRecord as JSON         │
//! └────────────┴─────────┴──────────────────────────────┘
//! ```
//!
//! A crash mid-append leaves at most one incomplete frame at the tail. Decoding
//! stops there and reports how many bytes are valid so the tail can be cut.

use crate::core_types::{LedgerRecord, SeqNum};

use super::checkpoint::CheckpointError;

pub const FRAME_HEADER_SIZE: usize = 16;

/// Journal file name inside the checkpoint directory
pub const JOURNAL_FILE: &str = "journal.log";

/// Frame one record
pub fn encode(record: &LedgerRecord) -> Result<Vec<u8>, CheckpointError> {
    let seq_id: SeqNum = record.id.parse().map_err(|_| {
        CheckpointError::Serialize(format!("record id {:?} is not a number", record.id))
    })?;
    let payload = serde_json::to_vec(record)?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| CheckpointError::Serialize(format!("record {} too large", record.id)))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&seq_id.to_le_bytes());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Result of decoding a journal
#[derive(Debug, Default)]
pub struct Decoded {
    pub records: Vec<LedgerRecord>,
    /// Bytes covered by complete, verified frames
    pub valid_len: usize,
}

impl Decoded {
    pub fn torn_bytes(&self, total: usize) -> usize {
        total - self.valid_len
    }
}

/// Decode every complete frame.
///
/// An incomplete or checksum-failing *last* frame is a torn append and ends
/// decoding; a bad frame followed by more data is corruption.
pub fn decode(bytes: &[u8]) -> Result<Decoded, CheckpointError> {
    let mut decoded = Decoded::default();

    while decoded.valid_len < bytes.len() {
        let rest = &bytes[decoded.valid_len..];
        if rest.len() < FRAME_HEADER_SIZE {
            break;
        }

        let seq_id = le_u64(&rest[0..8]);
        let payload_len = le_u32(&rest[8..12]) as usize;
        let checksum = le_u32(&rest[12..16]);
        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if rest.len() < frame_len {
            break;
        }

        let payload = &rest[FRAME_HEADER_SIZE..frame_len];
        if crc32fast::hash(payload) != checksum {
            if rest.len() == frame_len {
                break;
            }
            return Err(CheckpointError::Corrupt(format!(
                "journal checksum mismatch at seq_id={}",
                seq_id
            )));
        }

        let record: LedgerRecord = serde_json::from_slice(payload).map_err(|e| {
            CheckpointError::Corrupt(format!("journal frame {} unreadable: {}", seq_id, e))
        })?;
        if record.id != seq_id.to_string() {
            return Err(CheckpointError::Corrupt(format!(
                "journal frame {} carries record {}",
                seq_id, record.id
            )));
        }

        decoded.records.push(record);
        decoded.valid_len += frame_len;
    }

    Ok(decoded)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::TransactionDetails;

    fn record(n: u64) -> LedgerRecord {
        LedgerRecord::new(n, TransactionDetails::new("123", "456", n))
    }

    fn journal(ids: &[u64]) -> Vec<u8> {
        ids.iter()
            .flat_map(|n| encode(&record(*n)).unwrap())
            .collect()
    }

    #[test]
    fn test_frames_decode_in_order() {
        let bytes = journal(&[4, 5, 6]);
        let decoded = decode(&bytes).unwrap();

        let ids: Vec<String> = decoded.records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["4", "5", "6"]);
        assert_eq!(decoded.valid_len, bytes.len());
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let mut bytes = journal(&[1, 2]);
        let intact = bytes.len();
        let third = encode(&record(3)).unwrap();
        bytes.extend_from_slice(&third[..third.len() - 3]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.valid_len, intact);
        assert_eq!(decoded.torn_bytes(bytes.len()), third.len() - 3);
    }

    #[test]
    fn test_garbled_last_frame_is_torn() {
        let mut bytes = journal(&[1, 2]);
        let last = bytes.len() - 2;
        bytes[last] ^= 0xff;

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.records.len(), 1);
    }

    #[test]
    fn test_garbled_middle_frame_is_corrupt() {
        let mut bytes = journal(&[1, 2]);
        bytes[FRAME_HEADER_SIZE + 2] ^= 0xff;

        assert!(matches!(decode(&bytes), Err(CheckpointError::Corrupt(_))));
    }
}
