//! Journal-backed LRU disk store: editor/snapshot lifecycle, trim, and
//! civilized- vs non-civilized-filesystem zombie handling (SPEC_FULL.md
//! §4.10).
//!
//! Grounded in the teacher's connection pool (`engine/pool.rs`) for the
//! "one mutex guards a `HashMap` of live records, background trim walks it
//! under the same lock" shape — the disk LRU is that same pattern applied to
//! files on disk instead of live connections, with the journal replacing the
//! pool's in-memory-only bookkeeping with a crash-recoverable log.

use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::Arc,
};

use crate::sync::Mutex;

use super::journal::{self, Journal, JournalOp};

const REBUILD_THRESHOLD: usize = 2000;

struct LruEntry {
    lengths: Vec<u64>,
    readable: bool,
    editing: bool,
    zombie: bool,
    locking_source_count: u32,
    sequence: u64,
}

impl LruEntry {
    fn new(value_count: usize) -> Self {
        LruEntry {
            lengths: vec![0; value_count],
            readable: false,
            editing: false,
            zombie: false,
            locking_source_count: 0,
            sequence: 0,
        }
    }

    fn total_len(&self) -> u64 {
        self.lengths.iter().sum()
    }
}

struct State {
    journal: Journal,
    entries: HashMap<String, LruEntry>,
    size: u64,
    redundant_op_count: usize,
    next_sequence: u64,
}

struct Inner {
    dir: PathBuf,
    max_size: u64,
    app_version: u32,
    value_count: usize,
    civilized: bool,
    state: Mutex<State>,
}

/// A journaled, size-bounded, content-addressed on-disk cache. Cheaply
/// cloneable (an `Arc` handle), matching the connection pool's shared-handle
/// shape.
#[derive(Clone)]
pub struct DiskLruCache(Arc<Inner>);

impl DiskLruCache {
    pub fn open(dir: PathBuf, max_size: u64, app_version: u32, value_count: usize) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let civilized = journal::probe_civilized(&dir)?;
        let read = journal::open(&dir, app_version, value_count)?;
        let journal = Journal::create_or_open(&dir, app_version, value_count)?;

        let mut entries: HashMap<String, LruEntry> = HashMap::new();
        let mut next_sequence = 0u64;
        for op in &read.ops {
            next_sequence += 1;
            match op {
                JournalOp::Dirty { key } => {
                    entries
                        .entry(key.clone())
                        .or_insert_with(|| LruEntry::new(value_count));
                }
                JournalOp::Clean { key, lengths } => {
                    let entry = entries
                        .entry(key.clone())
                        .or_insert_with(|| LruEntry::new(value_count));
                    entry.lengths = lengths.clone();
                    entry.readable = true;
                    entry.editing = false;
                    entry.sequence = next_sequence;
                }
                JournalOp::Read { .. } => {}
                JournalOp::Remove { key } => {
                    entries.remove(key);
                }
            }
        }

        // Any entry left un-resolved (DIRTY with no later CLEAN/REMOVE) is
        // abandoned: its dirty files are cleaned up and it is dropped
        // (SPEC_FULL.md §4.10 "Journal invariants").
        entries.retain(|key, entry| {
            if !entry.readable {
                for i in 0..value_count {
                    let _ = fs::remove_file(journal::value_path(&dir, key, i, true));
                    let _ = fs::remove_file(journal::value_path(&dir, key, i, false));
                }
                false
            } else {
                true
            }
        });

        let size = entries.values().map(|e| e.total_len()).sum();

        Ok(DiskLruCache(Arc::new(Inner {
            dir,
            max_size,
            app_version,
            value_count,
            civilized,
            state: Mutex::new(State {
                journal,
                entries,
                size,
                redundant_op_count: read.redundant_op_count,
                next_sequence,
            }),
        })))
    }

    pub fn size(&self) -> u64 {
        self.0.state.lock().size
    }

    pub fn max_size(&self) -> u64 {
        self.0.max_size
    }

    pub fn is_civilized(&self) -> bool {
        self.0.civilized
    }

    /// Begins an edit of `key`. Returns `None` iff another edit of the same
    /// key is already in progress (SPEC_FULL.md §4.10 "Editor").
    pub fn edit(&self, key: &str) -> Option<Editor> {
        let mut state = self.0.state.lock();
        let is_new_entry = !state.entries.contains_key(key);
        let entry = state
            .entries
            .entry(key.to_string())
            .or_insert_with(|| LruEntry::new(self.0.value_count));
        if entry.editing || entry.zombie {
            return None;
        }
        entry.editing = true;
        let _ = state.journal.append(&JournalOp::Dirty { key: key.to_string() });

        Some(Editor {
            cache: self.clone(),
            key: key.to_string(),
            is_new_entry,
            written: vec![false; self.0.value_count],
            finished: false,
        })
    }

    pub fn dirty_path(&self, key: &str, index: usize) -> PathBuf {
        journal::value_path(&self.0.dir, key, index, true)
    }

    pub fn clean_path(&self, key: &str, index: usize) -> PathBuf {
        journal::value_path(&self.0.dir, key, index, false)
    }

    /// Reads a committed snapshot of `key`, or `None` if absent or currently
    /// being edited.
    pub fn get(&self, key: &str) -> Option<Snapshot> {
        let mut state = self.0.state.lock();
        let entry = state.entries.get_mut(key)?;
        if !entry.readable || entry.editing || entry.zombie {
            return None;
        }
        if !self.0.civilized {
            entry.locking_source_count += 1;
        }
        let lengths = entry.lengths.clone();
        let sequence = entry.sequence;
        let _ = state.journal.append(&JournalOp::Read { key: key.to_string() });
        state.redundant_op_count += 1;
        self.maybe_rebuild(&mut state);

        Some(Snapshot {
            cache: self.clone(),
            key: key.to_string(),
            sequence,
            lengths,
        })
    }

    /// Removes `key` immediately, unless it is currently being edited, in
    /// which case the removal is refused (SPEC_FULL.md "one editor at a
    /// time" — a concurrent edit wins).
    pub fn remove(&self, key: &str) -> io::Result<bool> {
        let mut state = self.0.state.lock();
        self.remove_locked(&mut state, key)
    }

    fn remove_locked(&self, state: &mut State, key: &str) -> io::Result<bool> {
        let Some(entry) = state.entries.get(key) else {
            return Ok(false);
        };
        if entry.editing {
            return Ok(false);
        }
        if !self.0.civilized && entry.locking_source_count > 0 {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.zombie = true;
            }
            return Ok(true);
        }

        let size = entry.total_len();
        for i in 0..self.0.value_count {
            let _ = fs::remove_file(self.clean_path(key, i));
        }
        state.entries.remove(key);
        state.size = state.size.saturating_sub(size);
        let _ = state.journal.append(&JournalOp::Remove { key: key.to_string() });
        state.redundant_op_count += 1;
        Ok(true)
    }

    /// Removes every non-pinned (not currently being edited) entry.
    pub fn evict_all(&self) -> io::Result<()> {
        let mut state = self.0.state.lock();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        for key in keys {
            self.remove_locked(&mut state, &key)?;
        }
        Ok(())
    }

    /// While over `max_size`, evicts the least-recently-used non-zombie,
    /// non-editing entry.
    pub fn trim(&self) -> io::Result<()> {
        let mut state = self.0.state.lock();
        self.trim_locked(&mut state)
    }

    fn trim_locked(&self, state: &mut State) -> io::Result<()> {
        while state.size > self.0.max_size {
            let victim = state
                .entries
                .iter()
                .filter(|(_, e)| !e.editing && !e.zombie)
                .min_by_key(|(_, e)| e.sequence)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    self.remove_locked(state, &key)?;
                }
                None => break,
            }
        }
        Ok(())
    }

    fn maybe_rebuild(&self, state: &mut State) {
        if state.redundant_op_count >= REBUILD_THRESHOLD && state.redundant_op_count >= state.entries.len() {
            let live = state
                .entries
                .iter()
                .filter(|(_, e)| e.readable)
                .map(|(k, e)| (k.clone(), e.lengths.clone()))
                .collect::<Vec<_>>();
            if state
                .journal
                .rebuild(&self.0.dir, self.0.app_version, self.0.value_count, live.into_iter())
                .is_ok()
            {
                state.redundant_op_count = 0;
            }
        }
    }

    fn release_locking_source(&self, key: &str) {
        let mut state = self.0.state.lock();
        let should_delete = if let Some(entry) = state.entries.get_mut(key) {
            if entry.locking_source_count > 0 {
                entry.locking_source_count -= 1;
            }
            entry.zombie && entry.locking_source_count == 0
        } else {
            false
        };
        if should_delete {
            let _ = self.remove_locked(&mut state, key);
        }
    }
}

/// A single in-progress edit of one cache key. Exactly one of
/// [`commit`](Self::commit)/[`abort`](Self::abort) must be called; dropping
/// an `Editor` without calling either aborts it.
pub struct Editor {
    cache: DiskLruCache,
    key: String,
    is_new_entry: bool,
    written: Vec<bool>,
    finished: bool,
}

impl Editor {
    pub fn dirty_path(&self, index: usize) -> PathBuf {
        self.cache.dirty_path(&self.key, index)
    }

    /// Call after the caller has written (or inherited, on an update, by
    /// copying the prior clean file) slot `index`'s dirty file.
    pub fn mark_written(&mut self, index: usize) {
        if let Some(slot) = self.written.get_mut(index) {
            *slot = true;
        }
    }

    pub fn commit(mut self) -> io::Result<()> {
        self.finished = true;
        let mut state = self.cache.0.state.lock();

        if self.is_new_entry && self.written.iter().any(|w| !w) {
            drop(state);
            return self.abort_inner();
        }

        let mut lengths = Vec::with_capacity(self.cache.0.value_count);
        for index in 0..self.cache.0.value_count {
            let dirty = self.cache.dirty_path(&self.key, index);
            let clean = self.cache.clean_path(&self.key, index);
            if dirty.exists() {
                let len = fs::metadata(&dirty)?.len();
                fs::rename(&dirty, &clean)?;
                lengths.push(len);
            } else {
                lengths.push(fs::metadata(&clean).map(|m| m.len()).unwrap_or(0));
            }
        }

        let old_size: u64 = state
            .entries
            .get(&self.key)
            .map(|e| e.total_len())
            .unwrap_or(0);
        let new_size: u64 = lengths.iter().sum();

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        let entry = state
            .entries
            .entry(self.key.clone())
            .or_insert_with(|| LruEntry::new(self.cache.0.value_count));
        entry.lengths = lengths.clone();
        entry.readable = true;
        entry.editing = false;
        entry.sequence = sequence;

        state.size = state.size - old_size + new_size;
        let _ = state.journal.append(&JournalOp::Clean {
            key: self.key.clone(),
            lengths,
        });
        state.redundant_op_count += 1;
        self.cache.maybe_rebuild(&mut state);
        self.cache.trim_locked(&mut state)?;
        Ok(())
    }

    pub fn abort(mut self) -> io::Result<()> {
        self.finished = true;
        self.abort_inner()
    }

    fn abort_inner(&self) -> io::Result<()> {
        for index in 0..self.cache.0.value_count {
            let _ = fs::remove_file(self.cache.dirty_path(&self.key, index));
        }
        let mut state = self.cache.0.state.lock();
        if self.is_new_entry {
            state.entries.remove(&self.key);
            let _ = state.journal.append(&JournalOp::Remove {
                key: self.key.clone(),
            });
        } else if let Some(entry) = state.entries.get_mut(&self.key) {
            entry.editing = false;
        }
        Ok(())
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.abort_inner();
        }
    }
}

/// A reader handle onto a committed version of a key. On non-civilized
/// filesystems this pins the entry's locking-source count so a concurrent
/// `remove`/trim is deferred (zombie) until every outstanding snapshot is
/// dropped.
pub struct Snapshot {
    cache: DiskLruCache,
    key: String,
    sequence: u64,
    lengths: Vec<u64>,
}

impl Snapshot {
    pub fn file_path(&self, index: usize) -> PathBuf {
        self.cache.clean_path(&self.key, index)
    }

    pub fn length(&self, index: usize) -> u64 {
        self.lengths.get(index).copied().unwrap_or(0)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if !self.cache.0.civilized {
            self.cache.release_locking_source(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn open_cache(dir: &std::path::Path) -> DiskLruCache {
        DiskLruCache::open(dir.to_path_buf(), 1024, 1, 2).unwrap()
    }

    #[test]
    fn commit_publishes_a_readable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let mut editor = cache.edit("key1").unwrap();
        fs::File::create(editor.dirty_path(0)).unwrap().write_all(b"meta").unwrap();
        editor.mark_written(0);
        fs::File::create(editor.dirty_path(1)).unwrap().write_all(b"body").unwrap();
        editor.mark_written(1);
        editor.commit().unwrap();

        let snap = cache.get("key1").unwrap();
        assert_eq!(snap.length(0), 4);
        assert_eq!(fs::read(snap.file_path(1)).unwrap(), b"body");
        assert_eq!(cache.size(), 8);
    }

    #[test]
    fn second_edit_of_same_key_is_refused_until_first_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let editor = cache.edit("key1").unwrap();
        assert!(cache.edit("key1").is_none());
        editor.abort().unwrap();
        assert!(cache.edit("key1").is_some());
    }

    #[test]
    fn abort_of_new_entry_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let mut editor = cache.edit("key1").unwrap();
        fs::File::create(editor.dirty_path(0)).unwrap();
        editor.mark_written(0);
        editor.abort().unwrap();

        assert!(cache.get("key1").is_none());
        assert!(!editor_dirty_exists(&cache, "key1", 0));
    }

    fn editor_dirty_exists(cache: &DiskLruCache, key: &str, index: usize) -> bool {
        cache.dirty_path(key, index).exists()
    }

    #[test]
    fn trim_evicts_oldest_entries_over_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskLruCache::open(dir.path().to_path_buf(), 10, 1, 1).unwrap();
        for i in 0..5 {
            let key = format!("k{i}");
            let mut editor = cache.edit(&key).unwrap();
            fs::File::create(editor.dirty_path(0)).unwrap().write_all(b"1234").unwrap();
            editor.mark_written(0);
            editor.commit().unwrap();
        }
        assert!(cache.size() <= 10);
        assert!(cache.get("k0").is_none(), "oldest entry should have been evicted");
        assert!(cache.get("k4").is_some(), "newest entry should survive");
    }

    #[test]
    fn commit_requires_every_slot_written_for_a_new_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path());
        let mut editor = cache.edit("key1").unwrap();
        fs::File::create(editor.dirty_path(0)).unwrap();
        editor.mark_written(0);
        // slot 1 never written
        editor.commit().unwrap();
        assert!(cache.get("key1").is_none());
    }

    #[test]
    fn reopen_recovers_committed_entries_from_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open_cache(dir.path());
            let mut editor = cache.edit("key1").unwrap();
            fs::File::create(editor.dirty_path(0)).unwrap().write_all(b"m").unwrap();
            editor.mark_written(0);
            fs::File::create(editor.dirty_path(1)).unwrap().write_all(b"b").unwrap();
            editor.mark_written(1);
            editor.commit().unwrap();
        }

        let reopened = open_cache(dir.path());
        let snap = reopened.get("key1").unwrap();
        assert_eq!(fs::read(snap.file_path(1)).unwrap(), b"b");
    }

    #[test]
    fn reopen_discards_unresolved_dirty_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open_cache(dir.path());
            let editor = cache.edit("key1").unwrap();
            fs::File::create(editor.dirty_path(0)).unwrap();
            // Deliberately leak the editor without commit/abort to simulate a
            // crash mid-edit.
            std::mem::forget(editor);
        }

        let reopened = open_cache(dir.path());
        assert!(reopened.get("key1").is_none());
    }
}
