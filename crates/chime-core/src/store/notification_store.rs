use crate::models::{NotificationKind, NotificationRecord};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::sync::Arc;

/// What `insert` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this id was seen.
    Inserted { unread: bool },
    /// Redelivery of a known id. Read state untouched.
    Merged { changed: bool },
    /// Same id but a strictly newer `created_at`: the record was replaced,
    /// read state included, and moved to its new position.
    Superseded { unread: bool },
}

impl InsertOutcome {
    /// Whether this insert should be announced to the user.
    pub fn is_announceable(&self) -> bool {
        match self {
            InsertOutcome::Inserted { .. } => true,
            InsertOutcome::Superseded { unread } => *unread,
            InsertOutcome::Merged { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    record: NotificationRecord,
    /// Arrival sequence; breaks `created_at` ties, newest arrival first.
    seq: u64,
}

impl Entry {
    fn sort_key(&self) -> (chrono::DateTime<chrono::Utc>, u64) {
        (self.record.created_at, self.seq)
    }
}

/// The notification ledger: records ordered by `created_at` descending and
/// the unread counter kept in lockstep with them.
#[derive(Debug, Default)]
pub struct NotificationStore {
    entries: Vec<Entry>,
    unread_count: usize,
    next_seq: u64,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.unread_count = 0;
    }

    // ===== Getters =====

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.position(id).map(|pos| &self.entries[pos].record)
    }

    /// Records newest first, optionally truncated.
    pub fn list(&self, limit: Option<usize>) -> Vec<&NotificationRecord> {
        let limit = limit.unwrap_or(usize::MAX);
        self.entries.iter().take(limit).map(|e| &e.record).collect()
    }

    pub fn unread(&self, limit: Option<usize>) -> Vec<&NotificationRecord> {
        let limit = limit.unwrap_or(usize::MAX);
        self.entries
            .iter()
            .map(|e| &e.record)
            .filter(|r| !r.is_read)
            .take(limit)
            .collect()
    }

    /// Counter matches the records. Holds after every public operation.
    pub fn is_consistent(&self) -> bool {
        self.unread_count == self.count_unread()
    }

    // ===== Mutations =====

    pub fn insert(&mut self, record: NotificationRecord) -> InsertOutcome {
        let Some(pos) = self.position(&record.id) else {
            let unread = !record.is_read;
            if unread {
                self.unread_count += 1;
            }
            let entry = self.new_entry(record);
            self.place(entry);
            return InsertOutcome::Inserted { unread };
        };

        if record.created_at > self.entries[pos].record.created_at {
            let mut entry = self.entries.remove(pos);
            if !entry.record.is_read {
                self.unread_count -= 1;
            }
            let unread = !record.is_read;
            if unread {
                self.unread_count += 1;
            }
            entry.record = record;
            entry.seq = self.bump_seq();
            self.place(entry);
            return InsertOutcome::Superseded { unread };
        }

        let existing = &mut self.entries[pos].record;
        let changed = existing.content_differs(&record);
        if changed {
            existing.title = record.title;
            existing.message = record.message;
            existing.payload = record.payload;
            existing.redirect_target = record.redirect_target;
        }
        InsertOutcome::Merged { changed }
    }

    /// Returns true only on the unread -> read transition.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        let record = &mut self.entries[pos].record;
        if record.is_read {
            return false;
        }
        record.is_read = true;
        self.unread_count -= 1;
        true
    }

    /// Marks everything read and returns how many records changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.record.is_read) {
            entry.record.is_read = true;
            changed += 1;
        }
        self.unread_count = 0;
        changed
    }

    pub fn mark_kind_read(&mut self, kind: &NotificationKind) -> usize {
        let mut changed = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| !e.record.is_read && &e.record.kind == kind)
        {
            entry.record.is_read = true;
            changed += 1;
        }
        self.unread_count -= changed;
        changed
    }

    /// Collapses records sharing an id. The surviving record carries the
    /// content of the latest arrival and the read state of the earliest one.
    /// The unread counter is recomputed from scratch afterwards.
    ///
    /// Returns the number of records removed.
    pub fn cleanup_duplicates(&mut self) -> usize {
        let removed = self.collapse_duplicates();
        let recounted = self.count_unread();
        if recounted != self.unread_count {
            tracing::warn!(
                "Unread counter drifted ({} tracked, {} actual), corrected",
                self.unread_count,
                recounted
            );
        }
        self.unread_count = recounted;
        removed
    }

    /// Bulk load without per-record dedup, then collapse duplicates so ids are
    /// unique again on return.
    ///
    /// Returns how many new ids were added.
    pub fn hydrate(&mut self, records: Vec<NotificationRecord>) -> usize {
        let added = records.len();
        for record in records {
            let entry = self.new_entry(record);
            self.entries.push(entry);
        }
        self.sort();
        let removed = self.collapse_duplicates();
        self.unread_count = self.count_unread();
        added.saturating_sub(removed)
    }

    /// Drops every duplicate but the latest arrival, which inherits the
    /// earliest arrival's read state. Leaves the counter untouched.
    fn collapse_duplicates(&mut self) -> usize {
        let mut latest: HashMap<&str, u64> = HashMap::new();
        let mut earliest: HashMap<&str, (u64, bool)> = HashMap::new();
        for entry in &self.entries {
            let id = entry.record.id.as_str();
            latest
                .entry(id)
                .and_modify(|seq| *seq = (*seq).max(entry.seq))
                .or_insert(entry.seq);
            earliest
                .entry(id)
                .and_modify(|(seq, read)| {
                    if entry.seq < *seq {
                        *seq = entry.seq;
                        *read = entry.record.is_read;
                    }
                })
                .or_insert((entry.seq, entry.record.is_read));
        }

        let keep: HashMap<String, (u64, bool)> = latest
            .into_iter()
            .map(|(id, seq)| (id.to_string(), (seq, earliest[id].1)))
            .collect();

        let before = self.entries.len();
        self.entries.retain_mut(|entry| match keep.get(&entry.record.id) {
            Some(&(seq, read)) if seq == entry.seq => {
                entry.record.is_read = read;
                true
            }
            _ => false,
        });
        before - self.entries.len()
    }

    /// Upserts records fetched from the server. Unlike `insert`, the server's
    /// read state wins for ids already present.
    ///
    /// Returns how many ids were new.
    pub fn apply_server_state(&mut self, records: Vec<NotificationRecord>) -> usize {
        let mut inserted = 0;
        for record in records {
            match self.position(&record.id) {
                Some(pos) => {
                    let mut entry = self.entries.remove(pos);
                    match (entry.record.is_read, record.is_read) {
                        (false, true) => self.unread_count -= 1,
                        (true, false) => self.unread_count += 1,
                        _ => {}
                    }
                    entry.record = record;
                    self.place(entry);
                }
                None => {
                    if let InsertOutcome::Inserted { .. } = self.insert(record) {
                        inserted += 1;
                    }
                }
            }
        }
        inserted
    }

    /// Full reload: the ledger becomes exactly `records`.
    pub fn replace_all(&mut self, records: Vec<NotificationRecord>) {
        self.clear();
        self.hydrate(records);
    }

    // ===== Internals =====

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.record.id == id)
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn new_entry(&mut self, record: NotificationRecord) -> Entry {
        let seq = self.bump_seq();
        Entry { record, seq }
    }

    /// Insert sorted by created_at (most recent first), latest arrival first on ties
    fn place(&mut self, entry: Entry) {
        let key = entry.sort_key();
        let pos = self.entries.partition_point(|e| e.sort_key() > key);
        self.entries.insert(pos, entry);
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    }

    fn count_unread(&self) -> usize {
        self.entries.iter().filter(|e| !e.record.is_read).count()
    }
}

/// Shared handle to the single ledger of a session.
///
/// Readers take `read()`; every mutation takes the write lock exactly once,
/// so a `mark_all_read` sweep and a concurrent `insert` never interleave.
#[derive(Clone, Default)]
pub struct SharedNotificationStore {
    inner: Arc<RwLock<NotificationStore>>,
}

impl SharedNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, NotificationStore> {
        self.inner.read()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.read().unread_count()
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<NotificationRecord> {
        self.inner.read().list(limit).into_iter().cloned().collect()
    }

    pub fn insert(&self, record: NotificationRecord) -> InsertOutcome {
        self.inner.write().insert(record)
    }

    pub fn mark_read(&self, id: &str) -> bool {
        self.inner.write().mark_read(id)
    }

    pub fn mark_all_read(&self) -> usize {
        self.inner.write().mark_all_read()
    }

    pub fn mark_kind_read(&self, kind: &NotificationKind) -> usize {
        self.inner.write().mark_kind_read(kind)
    }

    pub fn cleanup_duplicates(&self) -> usize {
        self.inner.write().cleanup_duplicates()
    }

    pub fn hydrate(&self, records: Vec<NotificationRecord>) -> usize {
        self.inner.write().hydrate(records)
    }

    pub fn apply_server_state(&self, records: Vec<NotificationRecord>) -> usize {
        self.inner.write().apply_server_state(records)
    }

    pub fn replace_all(&self, records: Vec<NotificationRecord>) {
        self.inner.write().replace_all(records)
    }
}
