use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Last access times for one absolute path. `None` means "never".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileRecord {
    pub last_read_at: Option<SystemTime>,
    pub last_write_at: Option<SystemTime>,
}

/// In-memory record of which files the agent has read and written.
///
/// Mutating tools consult it to enforce read-before-modify and to detect
/// files the user changed after the agent last looked at them. One ledger
/// lives as long as the agent that owns it and is shared by every tool.
#[derive(Debug, Default)]
pub struct FileLedger {
    records: Mutex<HashMap<PathBuf, FileRecord>>,
}

impl FileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, path: &Path) {
        self.records
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .last_read_at = Some(SystemTime::now());
    }

    pub fn record_write(&self, path: &Path) {
        self.records
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .last_write_at = Some(SystemTime::now());
    }

    pub fn last_read(&self, path: &Path) -> Option<SystemTime> {
        self.records.lock().get(path).and_then(|r| r.last_read_at)
    }

    pub fn last_write(&self, path: &Path) -> Option<SystemTime> {
        self.records.lock().get(path).and_then(|r| r.last_write_at)
    }

    pub fn record(&self, path: &Path) -> FileRecord {
        self.records.lock().get(path).copied().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_path_has_zero_timestamps() {
        let ledger = FileLedger::new();
        let rec = ledger.record(Path::new("/nope"));
        assert_eq!(rec, FileRecord::default());
    }

    #[test]
    fn read_and_write_are_tracked_separately() {
        let ledger = FileLedger::new();
        let p = Path::new("/tmp/a.txt");
        ledger.record_read(p);
        assert!(ledger.last_read(p).is_some());
        assert!(ledger.last_write(p).is_none());
        ledger.record_write(p);
        assert!(ledger.last_write(p).is_some());
    }
}
