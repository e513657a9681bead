//! Journal recovery.
//!
//! A crash can leave a half-written record at the end of the file. Recovery
//! keeps the longest prefix of intact records and cuts the rest off. A damaged
//! record in the middle of the file ends the prefix too: nothing after it is
//! trusted.

use crate::entry::JournalRecord;
use crate::error::JournalError;
use bytes::BytesMut;
use std::fs::OpenOptions;
use std::path::Path;

/// Result of a recovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of intact records.
    pub valid_records: u64,
    /// Bytes after the last intact record.
    pub bytes_truncated: u64,
    /// Highest sequence number seen.
    pub max_sequence: u64,
    /// Why the scan stopped early, if it did.
    pub stop_reason: Option<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.bytes_truncated == 0
    }
}

/// Decodes the intact prefix of `data`.
///
/// Returns the records with their offsets and the length of the prefix.
pub fn scan_records(data: &[u8]) -> (Vec<(u64, JournalRecord)>, u64, Option<String>) {
    let mut buf = BytesMut::from(data);
    let mut records = Vec::new();
    let mut offset = 0u64;

    loop {
        match JournalRecord::decode(&mut buf, offset) {
            Ok(Some(record)) => {
                let size = record.disk_size() as u64;
                records.push((offset, record));
                offset += size;
            }
            Ok(None) => {
                let reason = (!buf.is_empty()).then(|| format!("incomplete record at offset {}", offset));
                return (records, offset, reason);
            }
            Err(e) => return (records, offset, Some(e.to_string())),
        }
    }
}

/// Scans the journal file and, with `repair`, truncates everything after the
/// intact prefix.
pub fn recover(path: &Path, repair: bool) -> Result<RecoveryReport, JournalError> {
    if !path.exists() {
        return Ok(RecoveryReport::default());
    }

    let data = std::fs::read(path)?;
    let (records, valid_len, stop_reason) = scan_records(&data);

    let report = RecoveryReport {
        valid_records: records.len() as u64,
        bytes_truncated: data.len() as u64 - valid_len,
        max_sequence: records
            .iter()
            .map(|(_, r)| r.header.sequence)
            .max()
            .unwrap_or(0),
        stop_reason,
    };

    if repair && !report.is_clean() {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        tracing::warn!(
            "Truncated journal {} at offset {} (removed {} bytes: {})",
            path.display(),
            valid_len,
            report.bytes_truncated,
            report.stop_reason.as_deref().unwrap_or("unknown")
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::JournalEntry;
    use std::io::Write;
    use tempfile::TempDir;

    fn encoded(sequence: u64) -> Vec<u8> {
        let entry = JournalEntry::SaveHistory {
            chat_id: 1,
            user_id: 1,
            entries: vec![Some("Initial".to_string())],
        };
        JournalRecord::from_entry(&entry, sequence)
            .unwrap()
            .encode()
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_missing_file_is_clean() {
        let dir = TempDir::new().unwrap();
        let report = recover(&dir.path().join("none.journal"), true).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.valid_records, 0);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.journal");

        let first = encoded(1);
        let second = encoded(2);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&first).unwrap();
        file.write_all(&second[..second.len() / 2]).unwrap();
        drop(file);

        let report = recover(&path, true).unwrap();
        assert_eq!(report.valid_records, 1);
        assert_eq!(report.max_sequence, 1);
        assert_eq!(report.bytes_truncated, (second.len() / 2) as u64);
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            first.len() as u64
        );

        // A second pass finds nothing to do
        assert!(recover(&path, true).unwrap().is_clean());
    }

    #[test]
    fn test_corrupt_record_ends_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.journal");

        let first = encoded(1);
        let mut second = encoded(2);
        let third = encoded(3);
        let last = second.len() - 1;
        second[last] ^= 0xFF;

        let mut data = first.clone();
        data.extend_from_slice(&second);
        data.extend_from_slice(&third);
        std::fs::write(&path, &data).unwrap();

        let report = recover(&path, false).unwrap();
        assert_eq!(report.valid_records, 1);
        assert!(report.stop_reason.unwrap().contains("CRC"));
        // Without repair the file is untouched
        assert_eq!(std::fs::metadata(&path).unwrap().len(), data.len() as u64);
    }
}
