//! Main journal implementation.

use crate::entry::{JournalEntry, JournalRecord};
use crate::error::JournalError;
use crate::recovery::{self, RecoveryReport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fsync policy for journal writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FsyncPolicy {
    /// Fsync after every write (safest, slowest).
    #[default]
    EveryWrite,
    /// Fsync after N writes.
    EveryN(u32),
    /// Never fsync automatically (caller must call sync).
    Never,
}

impl FromStr for FsyncPolicy {
    type Err = JournalError;

    /// Parses `every_write`, `every_n:<N>` or `never`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "every_write" => Ok(FsyncPolicy::EveryWrite),
            "never" => Ok(FsyncPolicy::Never),
            _ => match s.strip_prefix("every_n:").map(str::parse::<u32>) {
                Some(Ok(n)) if n > 0 => Ok(FsyncPolicy::EveryN(n)),
                _ => Err(JournalError::InvalidFsyncPolicy(s.to_string())),
            },
        }
    }
}

impl TryFrom<String> for FsyncPolicy {
    type Error = JournalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FsyncPolicy> for String {
    fn from(policy: FsyncPolicy) -> Self {
        policy.to_string()
    }
}

impl fmt::Display for FsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsyncPolicy::EveryWrite => f.write_str("every_write"),
            FsyncPolicy::EveryN(n) => write!(f, "every_n:{}", n),
            FsyncPolicy::Never => f.write_str("never"),
        }
    }
}

/// Journal configuration.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Journal file.
    pub path: PathBuf,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync_policy: FsyncPolicy::default(),
        }
    }

    pub fn with_fsync_policy(mut self, policy: FsyncPolicy) -> Self {
        self.fsync_policy = policy;
        self
    }
}

/// I/O statistics for the journal.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalStats {
    pub bytes_written: u64,
    pub writes: u64,
    pub fsyncs: u64,
    pub rewrites: u64,
}

struct Writer {
    file: File,
    size: u64,
    writes_since_sync: u32,
}

impl Writer {
    /// Writes one encoded record at the end of the file.
    ///
    /// A failed write is cut back to the last complete record, so the next
    /// append does not land behind torn bytes.
    fn write_record(&mut self, data: &[u8]) -> Result<(), JournalError> {
        if let Err(e) = self.file.write_all(data) {
            if let Err(rollback) = self.rollback() {
                tracing::error!(
                    "Journal rollback to {} bytes failed: {}",
                    self.size,
                    rollback
                );
            }
            return Err(e.into());
        }
        self.size += data.len() as u64;
        self.writes_since_sync += 1;
        Ok(())
    }

    fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.size)?;
        self.file.seek(SeekFrom::Start(self.size))?;
        Ok(())
    }
}

/// Single-file append-only journal.
pub struct Journal {
    config: JournalConfig,
    writer: Mutex<Writer>,
    next_sequence: AtomicU64,
    recovery: RecoveryReport,
    stats_bytes_written: AtomicU64,
    stats_writes: AtomicU64,
    stats_fsyncs: AtomicU64,
    stats_rewrites: AtomicU64,
}

impl Journal {
    /// Opens or creates the journal, repairing a torn tail.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let recovery = recovery::recover(&config.path, true)?;
        let writer = Self::open_writer(&config.path)?;

        tracing::info!(
            "Journal opened: {} ({} records, next_sequence={})",
            config.path.display(),
            recovery.valid_records,
            recovery.max_sequence + 1
        );

        Ok(Self {
            next_sequence: AtomicU64::new(recovery.max_sequence + 1),
            config,
            writer: Mutex::new(writer),
            recovery,
            stats_bytes_written: AtomicU64::new(0),
            stats_writes: AtomicU64::new(0),
            stats_fsyncs: AtomicU64::new(0),
            stats_rewrites: AtomicU64::new(0),
        })
    }

    fn open_writer(path: &Path) -> Result<Writer, JournalError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let size = file.seek(SeekFrom::End(0))?;
        Ok(Writer {
            file,
            size,
            writes_since_sync: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// What recovery found when the journal was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Appends an entry and returns its sequence number.
    pub fn append(&self, entry: &JournalEntry) -> Result<u64, JournalError> {
        let mut writer = self.writer.lock();

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let encoded = JournalRecord::from_entry(entry, sequence)?.encode()?;
        writer.write_record(&encoded)?;

        self.stats_bytes_written
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);
        self.stats_writes.fetch_add(1, Ordering::Relaxed);

        let sync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => writer.writes_since_sync >= n,
            FsyncPolicy::Never => false,
        };
        if sync {
            writer.file.sync_data()?;
            writer.writes_since_sync = 0;
            self.stats_fsyncs.fetch_add(1, Ordering::Relaxed);
        }

        Ok(sequence)
    }

    /// Forces a sync to disk.
    pub fn sync(&self) -> Result<(), JournalError> {
        let mut writer = self.writer.lock();
        writer.file.sync_data()?;
        writer.writes_since_sync = 0;
        self.stats_fsyncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads every entry in append order.
    pub fn read_all(&self) -> Result<Vec<(u64, JournalEntry)>, JournalError> {
        // Hold the writer so no append lands half-way through the read
        let _writer = self.writer.lock();
        let data = std::fs::read(&self.config.path)?;
        let (records, _, stop_reason) = recovery::scan_records(&data);
        if let Some(reason) = stop_reason {
            return Err(JournalError::InvalidHeader {
                offset: records.last().map(|(o, r)| o + r.disk_size() as u64).unwrap_or(0),
                reason,
            });
        }

        records
            .into_iter()
            .map(|(_, record)| {
                record
                    .entry()
                    .map(|entry| (record.header.sequence, entry))
            })
            .collect()
    }

    /// Replaces the whole journal with `entries`.
    ///
    /// The new content is written to a sibling file and renamed over the
    /// journal, so a crash leaves either the old or the new file.
    pub fn rewrite(&self, entries: &[JournalEntry]) -> Result<(), JournalError> {
        let mut writer = self.writer.lock();
        let tmp_path = self.config.path.with_extension("journal.tmp");

        let mut size = 0u64;
        {
            let mut tmp = File::create(&tmp_path)?;
            for entry in entries {
                let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                let encoded = JournalRecord::from_entry(entry, sequence)?.encode()?;
                tmp.write_all(&encoded)?;
                size += encoded.len() as u64;
            }
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.config.path)?;

        *writer = Self::open_writer(&self.config.path)?;
        self.stats_rewrites.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            "Journal rewritten: {} records, {} bytes",
            entries.len(),
            size
        );
        Ok(())
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.writer.lock().size
    }

    /// Returns the next sequence number that will be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> JournalStats {
        JournalStats {
            bytes_written: self.stats_bytes_written.load(Ordering::Relaxed),
            writes: self.stats_writes.load(Ordering::Relaxed),
            fsyncs: self.stats_fsyncs.load(Ordering::Relaxed),
            rewrites: self.stats_rewrites.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> JournalConfig {
        JournalConfig::new(dir.join("histories.journal")).with_fsync_policy(FsyncPolicy::Never)
    }

    fn save(user_id: i64, names: &[&str]) -> JournalEntry {
        JournalEntry::SaveHistory {
            chat_id: 1,
            user_id,
            entries: names.iter().map(|n| Some(n.to_string())).collect(),
        }
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(test_config(dir.path())).unwrap();

        assert_eq!(journal.append(&save(1, &["Initial"])).unwrap(), 1);
        assert_eq!(journal.append(&save(1, &["Initial", "Menu"])).unwrap(), 2);

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], (2, save(1, &["Initial", "Menu"])));
        assert_eq!(journal.stats().writes, 2);
        assert_eq!(journal.stats().fsyncs, 0);
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        {
            let journal = Journal::open(test_config(dir.path())).unwrap();
            journal.append(&save(1, &["Initial"])).unwrap();
            journal.append(&save(2, &["Initial"])).unwrap();
            journal.sync().unwrap();
        }

        let journal = Journal::open(test_config(dir.path())).unwrap();
        assert!(journal.recovery_report().is_clean());
        assert_eq!(journal.next_sequence(), 3);
        assert_eq!(journal.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_open_repairs_torn_tail() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        {
            let journal = Journal::open(config.clone()).unwrap();
            journal.append(&save(1, &["Initial"])).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&config.path).unwrap();
            file.write_all(b"SCNJ\x01\x00").unwrap();
        }

        let journal = Journal::open(config).unwrap();
        assert_eq!(journal.recovery_report().bytes_truncated, 6);
        assert_eq!(journal.read_all().unwrap().len(), 1);

        journal.append(&save(1, &["Initial", "Menu"])).unwrap();
        assert_eq!(journal.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_rollback_drops_partial_record() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let journal = Journal::open(config.clone()).unwrap();
        journal.append(&save(1, &["Initial"])).unwrap();
        let size = journal.size();

        // Half a record made it out before the write failed
        {
            let mut writer = journal.writer.lock();
            let encoded = JournalRecord::from_entry(&save(1, &["Initial", "Menu"]), 99)
                .unwrap()
                .encode()
                .unwrap();
            writer.file.write_all(&encoded[..encoded.len() / 2]).unwrap();
            writer.rollback().unwrap();
        }
        assert_eq!(std::fs::metadata(&config.path).unwrap().len(), size);

        journal.append(&save(2, &["Initial"])).unwrap();
        drop(journal);

        let journal = Journal::open(config).unwrap();
        assert!(journal.recovery_report().is_clean());
        let users: Vec<i64> = journal
            .read_all()
            .unwrap()
            .into_iter()
            .filter_map(|(_, e)| e.conversation().map(|(_, user)| user))
            .collect();
        assert_eq!(users, [1, 2]);
    }

    #[test]
    fn test_rewrite() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(test_config(dir.path())).unwrap();
        for _ in 0..10 {
            journal.append(&save(1, &["Initial"])).unwrap();
        }
        let before = journal.size();

        journal
            .rewrite(&[
                JournalEntry::Checkpoint { conversations: 1 },
                save(1, &["Initial", "Menu"]),
            ])
            .unwrap();

        assert!(journal.size() < before);
        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, save(1, &["Initial", "Menu"]));
        assert!(entries[0].0 > 10);

        // Appends go to the rewritten file
        journal.append(&save(2, &["Initial"])).unwrap();
        assert_eq!(journal.read_all().unwrap().len(), 3);
        assert_eq!(journal.stats().rewrites, 1);
    }

    #[test]
    fn test_fsync_policy_parse() {
        assert_eq!(
            "every_write".parse::<FsyncPolicy>().unwrap(),
            FsyncPolicy::EveryWrite
        );
        assert_eq!(
            "every_n:16".parse::<FsyncPolicy>().unwrap(),
            FsyncPolicy::EveryN(16)
        );
        assert_eq!("NEVER".parse::<FsyncPolicy>().unwrap(), FsyncPolicy::Never);
        assert!("every_n:0".parse::<FsyncPolicy>().is_err());
        assert!("sometimes".parse::<FsyncPolicy>().is_err());
        assert_eq!(FsyncPolicy::EveryN(4).to_string(), "every_n:4");

        let json = serde_json::to_string(&FsyncPolicy::EveryN(8)).unwrap();
        assert_eq!(json, r#""every_n:8""#);
        assert_eq!(
            serde_json::from_str::<FsyncPolicy>(r#""never""#).unwrap(),
            FsyncPolicy::Never
        );
        assert!(serde_json::from_str::<FsyncPolicy>(r#""often""#).is_err());
    }

    #[test]
    fn test_every_n_syncs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).with_fsync_policy(FsyncPolicy::EveryN(2));
        let journal = Journal::open(config).unwrap();
        for _ in 0..5 {
            journal.append(&save(1, &["Initial"])).unwrap();
        }
        assert_eq!(journal.stats().fsyncs, 2);
    }

    proptest! {
        #[test]
        fn prop_entries_replay_in_order(users in proptest::collection::vec(0i64..50, 1..30)) {
            let dir = TempDir::new().unwrap();
            let journal = Journal::open(test_config(dir.path())).unwrap();
            for user in &users {
                journal.append(&JournalEntry::RemoveHistory { chat_id: 0, user_id: *user }).unwrap();
            }
            drop(journal);

            let journal = Journal::open(test_config(dir.path())).unwrap();
            let replayed: Vec<i64> = journal
                .read_all()
                .unwrap()
                .into_iter()
                .filter_map(|(_, e)| e.conversation().map(|(_, user)| user))
                .collect();
            prop_assert_eq!(replayed, users);
        }
    }
}
