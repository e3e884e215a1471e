//! Durable per-file validation ledger.
//!
//! Each tracked file has one [`FileValidationState`] keyed by its absolute
//! path. An entry is only trusted while its stored SHA-256 matches the file
//! on disk; every read rehashes the file and a mismatch discards the entry
//! (and persists the discard) before reporting it as absent. Reads are
//! therefore potential writes.
//!
//! Marks are buffered and flushed every `flush_interval` marks. Errors and
//! discards are flushed immediately. A flush is a single SQLite transaction
//! touching only the paths this store changed. For each of those it re-reads
//! the stored row, unions the cleared lines and appends only the errors it
//! has not written yet, so several stores sharing one database file keep
//! each other's work.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::config::expand_tilde;
use crate::errors::{LineSweepError, LineSweepResult};
use crate::models::{
    now_rfc3339, FileStatistics, FileValidationState, RecordedError, StoreStatistics,
};
use crate::store::fingerprint::{compute_content_hash, fingerprint, ledger_key};
use crate::store::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct LedgerCache {
    entries: HashMap<String, FileValidationState>,
    dirty: HashSet<String>,
    removed: HashSet<String>,
    /// Per path, how many leading entries of `errors` are already in SQLite.
    flushed_errors: HashMap<String, usize>,
    marks_since_flush: usize,
}

impl LedgerCache {
    fn discard(&mut self, key: &str) {
        self.entries.remove(key);
        self.dirty.remove(key);
        self.flushed_errors.remove(key);
        self.removed.insert(key.to_string());
    }

    fn has_pending(&self) -> bool {
        !self.dirty.is_empty() || !self.removed.is_empty()
    }
}

/// SQLite-backed clearance ledger.
pub struct ClearanceStore {
    db_path: PathBuf,
    flush_interval: usize,
    cache: Mutex<LedgerCache>,
}

impl ClearanceStore {
    /// Open (creating if needed) the ledger at `db_path` and load every
    /// existing entry before returning.
    pub fn open(db_path: impl AsRef<Path>, flush_interval: usize) -> LineSweepResult<Self> {
        let raw = db_path.as_ref().to_string_lossy().into_owned();
        let expanded = expand_tilde(&raw);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self {
            db_path: resolved,
            flush_interval: flush_interval.max(1),
            cache: Mutex::new(LedgerCache::default()),
        };
        let conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::init_schema(&conn)?;
        let entries = Self::load_entries(&conn)?;
        debug!(
            store = %store.db_path.display(),
            files = entries.len(),
            "loaded clearance ledger"
        );
        let mut cache = store.cache.lock();
        cache.flushed_errors = entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.errors.len()))
            .collect();
        cache.entries = entries;
        drop(cache);
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> LineSweepResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn load_entries(conn: &Connection) -> LineSweepResult<HashMap<String, FileValidationState>> {
        let mut entries = HashMap::new();

        let mut stmt = conn.prepare(
            "SELECT path, last_modified, file_hash, cleared_lines, total_lines FROM file_states;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        for row in rows {
            let (path, last_modified, file_hash, cleared_json, total_lines) = row?;
            let cleared_lines: BTreeSet<u32> = serde_json::from_str(&cleared_json)?;
            entries.insert(
                path.clone(),
                FileValidationState {
                    path,
                    last_modified,
                    file_hash,
                    cleared_lines,
                    total_lines: total_lines.max(0) as u32,
                    errors: Vec::new(),
                },
            );
        }

        let mut stmt = conn.prepare(
            "SELECT path, line, error, stack, occurred_at FROM file_errors ORDER BY id;",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                RecordedError {
                    line: row.get::<_, i64>(1)?.max(0) as u32,
                    error: row.get(2)?,
                    stack: row.get(3)?,
                    occurred_at: row.get(4)?,
                },
            ))
        })?;
        for row in rows {
            let (path, error) = row?;
            if let Some(entry) = entries.get_mut(&path) {
                entry.errors.push(error);
            }
        }
        Ok(entries)
    }

    fn load_errors(conn: &Connection, path: &str) -> LineSweepResult<Vec<RecordedError>> {
        let mut stmt = conn.prepare(
            "SELECT line, error, stack, occurred_at FROM file_errors WHERE path = ?1 ORDER BY id;",
        )?;
        let rows = stmt.query_map(params![path], |row| {
            Ok(RecordedError {
                line: row.get::<_, i64>(0)?.max(0) as u32,
                error: row.get(1)?,
                stack: row.get(2)?,
                occurred_at: row.get(3)?,
            })
        })?;
        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok(errors)
    }

    // -- freshness -----------------------------------------------------------

    /// Keep the entry for `key` only if the file still hashes the same.
    /// Returns whether a trusted entry remains.
    fn ensure_fresh(&self, cache: &mut LedgerCache, key: &str) -> LineSweepResult<bool> {
        let stored = match cache.entries.get(key) {
            Some(entry) => entry.file_hash.clone(),
            None => return Ok(false),
        };
        let current = compute_content_hash(Path::new(key)).ok();
        if current.as_deref() == Some(stored.as_str()) {
            return Ok(true);
        }
        info!(file = key, "content hash changed, discarding ledger entry");
        cache.discard(key);
        self.persist(cache)?;
        Ok(false)
    }

    /// Trusted entry for `key`, creating a fresh one from disk if needed.
    fn entry_mut<'a>(
        &self,
        cache: &'a mut LedgerCache,
        key: &str,
    ) -> LineSweepResult<&'a mut FileValidationState> {
        if !self.ensure_fresh(cache, key)? {
            let fp = fingerprint(Path::new(key)).map_err(|e| LineSweepError::source_read(key, e))?;
            cache.removed.remove(key);
            cache.flushed_errors.remove(key);
            cache.entries.insert(
                key.to_string(),
                FileValidationState {
                    path: key.to_string(),
                    last_modified: fp.modified_ms,
                    file_hash: fp.hash,
                    cleared_lines: BTreeSet::new(),
                    total_lines: fp.total_lines,
                    errors: Vec::new(),
                },
            );
            cache.dirty.insert(key.to_string());
        }
        cache
            .entries
            .get_mut(key)
            .ok_or_else(|| LineSweepError::StoreNotFound(key.to_string()))
    }

    // -- public API ------------------------------------------------------------

    pub fn is_line_cleared(&self, path: &Path, line: u32) -> LineSweepResult<bool> {
        let key = ledger_key(path);
        let mut cache = self.cache.lock();
        if !self.ensure_fresh(&mut cache, &key)? {
            return Ok(false);
        }
        Ok(cache
            .entries
            .get(&key)
            .is_some_and(|entry| entry.cleared_lines.contains(&line)))
    }

    pub fn mark_line_cleared(&self, path: &Path, line: u32) -> LineSweepResult<()> {
        let key = ledger_key(path);
        let mut cache = self.cache.lock();
        let inserted = self.entry_mut(&mut cache, &key)?.cleared_lines.insert(line);
        if inserted {
            cache.dirty.insert(key);
            cache.marks_since_flush += 1;
        }
        if cache.marks_since_flush >= self.flush_interval {
            self.persist(&mut cache)?;
        }
        Ok(())
    }

    pub fn record_error(
        &self,
        path: &Path,
        line: u32,
        message: &str,
        stack: Option<&str>,
    ) -> LineSweepResult<()> {
        let key = ledger_key(path);
        let occurred_at = now_rfc3339()?;
        let mut cache = self.cache.lock();
        self.entry_mut(&mut cache, &key)?.errors.push(RecordedError {
            line,
            error: message.to_string(),
            stack: stack.map(str::to_string),
            occurred_at,
        });
        cache.dirty.insert(key);
        self.persist(&mut cache)
    }

    /// Cleared line numbers in ascending order; empty if untracked or stale.
    pub fn get_cleared_lines(&self, path: &Path) -> LineSweepResult<Vec<u32>> {
        Ok(self
            .get_file_state(path)?
            .map(|state| state.cleared_lines.into_iter().collect())
            .unwrap_or_default())
    }

    pub fn get_file_state(&self, path: &Path) -> LineSweepResult<Option<FileValidationState>> {
        let key = ledger_key(path);
        let mut cache = self.cache.lock();
        if !self.ensure_fresh(&mut cache, &key)? {
            return Ok(None);
        }
        Ok(cache.entries.get(&key).cloned())
    }

    /// Forget one file entirely. Returns whether an entry existed.
    pub fn clear_file(&self, path: &Path) -> LineSweepResult<bool> {
        let key = ledger_key(path);
        let mut cache = self.cache.lock();
        let existed = cache.entries.contains_key(&key);
        if existed {
            cache.discard(&key);
            self.persist(&mut cache)?;
        }
        Ok(existed)
    }

    pub fn tracked_paths(&self) -> Vec<String> {
        let cache = self.cache.lock();
        let mut paths: Vec<String> = cache.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Rehash every tracked file and discard entries whose content changed.
    /// Returns the discarded paths, sorted.
    pub fn prune_stale(&self) -> LineSweepResult<Vec<String>> {
        let snapshot: Vec<(String, String)> = {
            let cache = self.cache.lock();
            cache
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.file_hash.clone()))
                .collect()
        };

        let mut stale: Vec<String> = snapshot
            .par_iter()
            .filter(|(key, stored)| {
                compute_content_hash(Path::new(key)).ok().as_deref() != Some(stored.as_str())
            })
            .map(|(key, _)| key.clone())
            .collect();
        stale.sort();

        if !stale.is_empty() {
            let mut cache = self.cache.lock();
            for key in &stale {
                info!(file = %key, "content hash changed, discarding ledger entry");
                cache.discard(key);
            }
            self.persist(&mut cache)?;
        }
        Ok(stale)
    }

    pub fn get_statistics(&self) -> LineSweepResult<StoreStatistics> {
        self.prune_stale()?;
        let cache = self.cache.lock();
        let mut stats = StoreStatistics::default();
        for (path, entry) in &cache.entries {
            stats.total_files += 1;
            stats.total_cleared_lines += entry.cleared_lines.len();
            stats.total_errors += entry.errors.len();
            stats.files.insert(
                path.clone(),
                FileStatistics {
                    cleared: entry.cleared_lines.len(),
                    total: entry.total_lines,
                    percentage: entry.cleared_percentage(),
                },
            );
        }
        Ok(stats)
    }

    /// The whole in-memory ledger keyed by absolute path.
    pub fn export_ledger(&self) -> BTreeMap<String, FileValidationState> {
        let cache = self.cache.lock();
        cache
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Ledger rendered as `{ path: { lastModified, fileHash, ... } }`.
    pub fn export_json(&self) -> LineSweepResult<String> {
        Ok(serde_json::to_string_pretty(&self.export_ledger())?)
    }

    pub fn pending_writes(&self) -> usize {
        let cache = self.cache.lock();
        cache.dirty.len() + cache.removed.len()
    }

    pub fn flush(&self) -> LineSweepResult<()> {
        let mut cache = self.cache.lock();
        self.persist(&mut cache)
    }

    /// Final flush; the store stays usable afterwards.
    pub fn close(&self) -> LineSweepResult<()> {
        self.flush()
    }

    // -- persistence -----------------------------------------------------------

    fn persist(&self, cache: &mut LedgerCache) -> LineSweepResult<()> {
        if !cache.has_pending() {
            cache.marks_since_flush = 0;
            return Ok(());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        for key in &cache.removed {
            tx.execute("DELETE FROM file_errors WHERE path = ?1;", params![key])?;
            tx.execute("DELETE FROM file_states WHERE path = ?1;", params![key])?;
        }

        // Another store may have flushed this path since we loaded it.
        // Merge with the stored row rather than overwrite it.
        let dirty: Vec<String> = cache.dirty.iter().cloned().collect();
        for key in &dirty {
            let Some(entry) = cache.entries.get_mut(key) else {
                continue;
            };
            let stored: Option<(String, String)> = tx
                .query_row(
                    "SELECT file_hash, cleared_lines FROM file_states WHERE path = ?1;",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let unflushed_from = match stored {
                Some((hash, cleared_json)) if hash == entry.file_hash => {
                    let stored_lines: BTreeSet<u32> = serde_json::from_str(&cleared_json)?;
                    entry.cleared_lines.extend(stored_lines);
                    cache
                        .flushed_errors
                        .get(key)
                        .copied()
                        .unwrap_or(0)
                        .min(entry.errors.len())
                }
                _ => {
                    // Absent, or recorded against other content.
                    tx.execute("DELETE FROM file_errors WHERE path = ?1;", params![key])?;
                    0
                }
            };

            let cleared = serde_json::to_string(&entry.cleared_lines)?;
            tx.execute(
                "INSERT INTO file_states \
                     (path, last_modified, file_hash, cleared_lines, total_lines) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(path) DO UPDATE SET \
                     last_modified = excluded.last_modified, \
                     file_hash = excluded.file_hash, \
                     cleared_lines = excluded.cleared_lines, \
                     total_lines = excluded.total_lines, \
                     updated_at = CURRENT_TIMESTAMP;",
                params![
                    key,
                    entry.last_modified,
                    entry.file_hash,
                    cleared,
                    entry.total_lines as i64
                ],
            )?;
            for error in &entry.errors[unflushed_from..] {
                tx.execute(
                    "INSERT INTO file_errors (path, line, error, stack, occurred_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5);",
                    params![
                        key,
                        error.line as i64,
                        error.error,
                        error.stack,
                        error.occurred_at
                    ],
                )?;
            }
            entry.errors = Self::load_errors(&tx, key)?;
            let flushed = entry.errors.len();
            cache.flushed_errors.insert(key.clone(), flushed);
        }

        tx.commit()?;
        debug!(
            store = %self.db_path.display(),
            written = cache.dirty.len(),
            removed = cache.removed.len(),
            "flushed clearance ledger"
        );
        cache.dirty.clear();
        cache.removed.clear();
        cache.marks_since_flush = 0;
        Ok(())
    }
}

impl Drop for ClearanceStore {
    fn drop(&mut self) {
        let mut cache = self.cache.lock();
        if cache.has_pending() {
            if let Err(e) = self.persist(&mut cache) {
                warn!(store = %self.db_path.display(), "failed to flush ledger on drop: {e}");
            }
        }
    }
}
