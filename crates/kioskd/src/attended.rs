//! Per-day attended set: which identities already have a mark today.
//!
//! The in-memory set is authoritative for deduplication. It is snapshotted
//! to JSON after every new claim and reloaded at startup only when the
//! snapshot carries today's date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Snapshot {
    date: NaiveDate,
    attended: BTreeSet<String>,
}

impl Snapshot {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            attended: BTreeSet::new(),
        }
    }
}

pub struct AttendedSet {
    path: PathBuf,
    inner: Mutex<Snapshot>,
}

impl AttendedSet {
    /// Load the snapshot at `path`, discarding it unless it is dated `today`.
    ///
    /// A missing or unreadable snapshot starts an empty set.
    pub fn load(path: &Path, today: NaiveDate) -> Self {
        let snapshot = match read_snapshot(path) {
            Some(s) if s.date == today => {
                tracing::info!(date = %today, attended = s.attended.len(), "attended set restored");
                s
            }
            Some(s) => {
                tracing::info!(snapshot_date = %s.date, today = %today, "stale attended snapshot discarded");
                Snapshot::empty(today)
            }
            None => Snapshot::empty(today),
        };

        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(snapshot),
        }
    }

    /// Atomically check-and-insert `employee_id` for `date`.
    ///
    /// Returns `true` when this call claimed the mark, `false` when the
    /// identity was already attended that day. A claim for a different date
    /// than the set's current one rolls the set over first.
    pub fn try_claim(&self, employee_id: &str, date: NaiveDate) -> bool {
        let mut guard = self.lock();
        if guard.date != date {
            tracing::info!(from = %guard.date, to = %date, "attended set rolled over");
            *guard = Snapshot::empty(date);
        }
        if !guard.attended.insert(employee_id.to_string()) {
            return false;
        }

        if let Err(e) = write_snapshot(&self.path, &guard) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist attended snapshot");
        }
        true
    }

    /// Whether `employee_id` is attended on `date`.
    #[cfg(test)]
    pub fn contains(&self, employee_id: &str, date: NaiveDate) -> bool {
        let guard = self.lock();
        guard.date == date && guard.attended.contains(employee_id)
    }

    /// Identities attended on `date` (empty if the set holds another day).
    pub fn attended(&self, date: NaiveDate) -> BTreeSet<String> {
        let guard = self.lock();
        if guard.date == date {
            guard.attended.clone()
        } else {
            BTreeSet::new()
        }
    }

    pub fn count(&self, date: NaiveDate) -> usize {
        let guard = self.lock();
        if guard.date == date {
            guard.attended.len()
        } else {
            0
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        // A panic while holding the lock cannot leave the set half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_snapshot(path: &Path) -> Option<Snapshot> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read attended snapshot");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt attended snapshot ignored");
            None
        }
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
    let json = serde_json::to_vec(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}
