//! Journal entry types.
//!
//! Each journal record has the following on-disk format:
//!
//! ```text
//! +----------+-----------------+----------+----------+----------+----------+
//! | magic    | sequence_number | type     | reserved | length   | crc32c   |
//! | 4 bytes  | 8 bytes         | 1 byte   | 3 bytes  | 4 bytes  | 4 bytes  |
//! +----------+-----------------+----------+----------+----------+----------+
//! | payload (JSON), length bytes                                           |
//! +------------------------------------------------------------------------+
//! ```
//!
//! The checksum covers the sequence number, type and reserved bytes as well
//! as the payload, so a damaged header is caught like a damaged payload.

use crate::error::JournalError;
use crate::RECORD_HEADER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Magic bytes for journal records: "SCNJ"
pub const JOURNAL_MAGIC: [u8; 4] = *b"SCNJ";

/// Maximum record payload size (4 MiB).
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Type of journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum JournalEntryType {
    /// Full history of one conversation.
    SaveHistory = 1,
    /// Conversation history dropped.
    RemoveHistory = 2,
    /// Written first by a compaction rewrite.
    Checkpoint = 3,
}

impl TryFrom<u8> for JournalEntryType {
    type Error = JournalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JournalEntryType::SaveHistory),
            2 => Ok(JournalEntryType::RemoveHistory),
            3 => Ok(JournalEntryType::Checkpoint),
            _ => Err(JournalError::InvalidHeader {
                offset: 0,
                reason: format!("unknown entry type: {}", value),
            }),
        }
    }
}

/// Bytes of the header covered by the checksum.
const CHECKED_HEADER: std::ops::Range<usize> = 4..16;

/// A parsed journal record header.
#[derive(Debug, Clone)]
pub struct JournalRecordHeader {
    pub sequence: u64,
    pub entry_type: JournalEntryType,
    pub payload_len: u32,
    pub crc32c: u32,
}

impl JournalRecordHeader {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&JOURNAL_MAGIC);
        buf.put_u64(self.sequence);
        buf.put_u8(self.entry_type as u8);
        buf.put_bytes(0, 3);
        buf.put_u32(self.payload_len);
        buf.put_u32(self.crc32c);
    }
}

/// Checksum of the checked header bytes followed by the payload.
fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(header), payload)
}

/// A complete journal record (header + payload).
#[derive(Debug, Clone)]
pub struct JournalRecord {
    pub header: JournalRecordHeader,
    pub payload: Bytes,
}

impl JournalRecord {
    pub fn new(entry_type: JournalEntryType, sequence: u64, payload: Bytes) -> Self {
        let mut record = Self {
            header: JournalRecordHeader {
                sequence,
                entry_type,
                payload_len: payload.len() as u32,
                crc32c: 0,
            },
            payload,
        };
        let mut head = BytesMut::with_capacity(RECORD_HEADER_SIZE);
        record.header.put(&mut head);
        record.header.crc32c = checksum(&head[CHECKED_HEADER], &record.payload);
        record
    }

    /// Serializes an entry into a record.
    pub fn from_entry(entry: &JournalEntry, sequence: u64) -> Result<Self, JournalError> {
        let payload = serde_json::to_vec(entry)?;
        Ok(Self::new(entry.entry_type(), sequence, Bytes::from(payload)))
    }

    /// Deserializes the payload.
    pub fn entry(&self) -> Result<JournalEntry, JournalError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    pub fn encode(&self) -> Result<BytesMut, JournalError> {
        if self.payload.len() > MAX_RECORD_SIZE {
            return Err(JournalError::RecordTooLarge {
                size: self.payload.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(self.disk_size());
        self.header.put(&mut buf);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes one record from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds less than a full record. Nothing
    /// is consumed unless a record is returned.
    pub fn decode(buf: &mut BytesMut, offset: u64) -> Result<Option<Self>, JournalError> {
        if buf.len() < RECORD_HEADER_SIZE {
            return Ok(None);
        }

        let mut head = &buf[..RECORD_HEADER_SIZE];
        let mut magic = [0u8; 4];
        head.copy_to_slice(&mut magic);
        if magic != JOURNAL_MAGIC {
            return Err(JournalError::InvalidHeader {
                offset,
                reason: format!("invalid magic: {:?}", magic),
            });
        }
        let sequence = head.get_u64();
        let type_byte = head.get_u8();
        head.advance(3);
        let payload_len = head.get_u32() as usize;
        let crc_expected = head.get_u32();

        if payload_len > MAX_RECORD_SIZE {
            return Err(JournalError::RecordTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }
        if buf.len() < RECORD_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        let crc_actual = checksum(
            &buf[CHECKED_HEADER],
            &buf[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + payload_len],
        );
        if crc_actual != crc_expected {
            return Err(JournalError::CorruptedRecord {
                offset,
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        let entry_type =
            JournalEntryType::try_from(type_byte).map_err(|_| JournalError::InvalidHeader {
                offset,
                reason: format!("unknown entry type: {}", type_byte),
            })?;

        buf.advance(RECORD_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Self {
            header: JournalRecordHeader {
                sequence,
                entry_type,
                payload_len: payload_len as u32,
                crc32c: crc_expected,
            },
            payload,
        }))
    }

    /// Returns the total size of this record on disk.
    pub fn disk_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len()
    }
}

/// Typed journal entry with deserialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    SaveHistory {
        chat_id: i64,
        user_id: i64,
        entries: Vec<Option<String>>,
    },
    RemoveHistory {
        chat_id: i64,
        user_id: i64,
    },
    Checkpoint {
        /// Number of live conversations written after this marker.
        conversations: u64,
    },
}

impl JournalEntry {
    pub fn entry_type(&self) -> JournalEntryType {
        match self {
            JournalEntry::SaveHistory { .. } => JournalEntryType::SaveHistory,
            JournalEntry::RemoveHistory { .. } => JournalEntryType::RemoveHistory,
            JournalEntry::Checkpoint { .. } => JournalEntryType::Checkpoint,
        }
    }

    /// Returns the `(chat_id, user_id)` pair for conversation entries.
    pub fn conversation(&self) -> Option<(i64, i64)> {
        match self {
            JournalEntry::SaveHistory {
                chat_id, user_id, ..
            }
            | JournalEntry::RemoveHistory { chat_id, user_id } => Some((*chat_id, *user_id)),
            JournalEntry::Checkpoint { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save() -> JournalEntry {
        JournalEntry::SaveHistory {
            chat_id: -100,
            user_id: 7,
            entries: vec![Some("Initial".to_string()), Some("Menu".to_string())],
        }
    }

    #[test]
    fn test_record_from_entry() {
        let record = JournalRecord::from_entry(&save(), 42).unwrap();
        let mut buf = record.encode().unwrap();
        let decoded = JournalRecord::decode(&mut buf, 0).unwrap().unwrap();

        assert_eq!(decoded.header.entry_type, JournalEntryType::SaveHistory);
        assert_eq!(decoded.header.sequence, 42);
        assert_eq!(decoded.entry().unwrap(), save());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_corrupted_record_detection() {
        let record = JournalRecord::from_entry(&save(), 1).unwrap();
        let mut encoded = record.encode().unwrap();
        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let result = JournalRecord::decode(&mut encoded, 0);
        assert!(matches!(result, Err(JournalError::CorruptedRecord { .. })));
    }

    #[test]
    fn test_damaged_sequence_detected() {
        let record = JournalRecord::from_entry(&save(), 7).unwrap();
        let mut encoded = record.encode().unwrap();
        // Low byte of the sequence number
        encoded[11] ^= 0x01;

        let result = JournalRecord::decode(&mut encoded, 0);
        assert!(matches!(result, Err(JournalError::CorruptedRecord { .. })));
        assert_eq!(encoded.len(), record.disk_size());
    }

    #[test]
    fn test_incomplete_record() {
        let record = JournalRecord::from_entry(&save(), 1).unwrap();
        let encoded = record.encode().unwrap();

        let mut header_only = BytesMut::from(&encoded[..RECORD_HEADER_SIZE]);
        assert!(JournalRecord::decode(&mut header_only, 0).unwrap().is_none());

        let mut partial = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(JournalRecord::decode(&mut partial, 0).unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = BytesMut::from(&[0u8; RECORD_HEADER_SIZE][..]);
        let result = JournalRecord::decode(&mut buf, 0);
        assert!(matches!(result, Err(JournalError::InvalidHeader { .. })));
    }

    #[test]
    fn test_record_too_large() {
        let payload = Bytes::from(vec![b'x'; MAX_RECORD_SIZE + 1]);
        let record = JournalRecord::new(JournalEntryType::SaveHistory, 1, payload);
        assert!(matches!(
            record.encode(),
            Err(JournalError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(save()).unwrap();
        assert_eq!(json["type"], "save_history");
        assert_eq!(json["entries"][1], "Menu");

        let remove = JournalEntry::RemoveHistory {
            chat_id: 1,
            user_id: 2,
        };
        assert_eq!(remove.conversation(), Some((1, 2)));
        assert_eq!(remove.entry_type(), JournalEntryType::RemoveHistory);
        assert_eq!(
            JournalEntry::Checkpoint { conversations: 0 }.conversation(),
            None
        );
    }

    #[test]
    fn test_entry_type_conversion() {
        assert_eq!(
            JournalEntryType::try_from(1u8).unwrap(),
            JournalEntryType::SaveHistory
        );
        assert_eq!(
            JournalEntryType::try_from(3u8).unwrap(),
            JournalEntryType::Checkpoint
        );
        assert!(JournalEntryType::try_from(9u8).is_err());
    }
}
