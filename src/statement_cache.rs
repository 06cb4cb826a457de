//! Cache of server-prepared statements
//!
//! Prepared statements that take the server-side path leave a parsed cursor
//! behind. The cache maps SQL text to that cursor so a later prepare of the
//! same text re-executes it instead of parsing again.
//!
//! # Cursor lifecycle
//!
//! - A cached cursor is handed to at most one statement at a time.
//! - Evicting an entry, or clearing the cache, returns the cursor ids that
//!   must be closed on the server. The connection queues them and releases
//!   them before its next exchange.
//! - DDL is never cached.

use indexmap::IndexMap;
use std::time::Instant;

use crate::statement::{ColumnInfo, StatementType};

/// A parsed server cursor with the metadata it described
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCursor {
    /// Server cursor id
    pub cursor_id: u32,
    /// Result columns, when the statement is a query
    pub columns: Option<Vec<ColumnInfo>>,
}

#[derive(Debug)]
struct CacheEntry {
    cursor: CachedCursor,
    in_use: bool,
    last_used: Instant,
}

impl CacheEntry {
    fn new(cursor: CachedCursor) -> Self {
        Self {
            cursor,
            in_use: false,
            last_used: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

/// LRU cache of prepared cursors keyed by SQL text
#[derive(Debug)]
pub struct StatementCache {
    entries: IndexMap<String, CacheEntry>,
    max_size: usize,
}

impl StatementCache {
    /// Create a cache holding at most `max_size` cursors; 0 disables it
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(max_size),
            max_size,
        }
    }

    /// Check out the cursor cached for `sql`
    ///
    /// Returns `None` on a miss, or when another statement holds the cursor.
    pub fn get(&mut self, sql: &str) -> Option<CachedCursor> {
        if self.max_size == 0 {
            return None;
        }
        let entry = match self.entries.get_mut(sql) {
            Some(entry) => entry,
            None => {
                tracing::trace!(sql, "statement cache miss");
                return None;
            }
        };
        entry.touch();
        if entry.in_use {
            tracing::trace!(sql, "statement cache hit but cursor in use");
            return None;
        }
        entry.in_use = true;
        tracing::trace!(sql, cursor_id = entry.cursor.cursor_id, "statement cache hit");
        Some(entry.cursor.clone())
    }

    /// Store the cursor of a freshly prepared statement, checked out
    ///
    /// Returns cursor ids the caller must close (an evicted entry's cursor).
    /// A cursor that cannot be cached stays with the caller, which learns
    /// this from [`release`](Self::release) returning `false`.
    pub fn put(&mut self, sql: &str, cursor: CachedCursor, kind: StatementType) -> Vec<u32> {
        if self.max_size == 0 || kind == StatementType::Ddl || cursor.cursor_id == 0 {
            return Vec::new();
        }

        if let Some(entry) = self.entries.get_mut(sql) {
            let mut released = Vec::new();
            if entry.cursor.cursor_id != cursor.cursor_id && !entry.in_use {
                released.push(entry.cursor.cursor_id);
            }
            entry.cursor = cursor;
            entry.in_use = true;
            entry.touch();
            return released;
        }

        let mut released = Vec::new();
        if self.entries.len() >= self.max_size {
            match self.evict_lru() {
                Some(id) => released.push(id),
                None => {
                    // every cached cursor is checked out
                    tracing::warn!(sql, "statement cache full, not caching");
                    return released;
                }
            }
        }

        tracing::trace!(sql, cursor_id = cursor.cursor_id, "caching prepared statement");
        let mut entry = CacheEntry::new(cursor);
        entry.in_use = true;
        self.entries.insert(sql.to_string(), entry);
        released
    }

    /// Give a checked-out cursor back
    ///
    /// Returns `false` when `cursor_id` is not the cached cursor for `sql`, in
    /// which case the caller owns it and must close it.
    pub fn release(&mut self, sql: &str, cursor_id: u32) -> bool {
        match self.entries.get_mut(sql) {
            Some(entry) if entry.cursor.cursor_id == cursor_id => {
                entry.in_use = false;
                true
            }
            _ => false,
        }
    }

    /// Drop the entry for `sql`, e.g. after the server rejected its cursor
    pub fn invalidate(&mut self, sql: &str) -> Option<u32> {
        let entry = self.entries.shift_remove(sql)?;
        tracing::debug!(sql, cursor_id = entry.cursor.cursor_id, "statement cache entry invalidated");
        Some(entry.cursor.cursor_id)
    }

    /// Remove every entry, returning their cursor ids
    pub fn clear(&mut self) -> Vec<u32> {
        let ids = self.entries.drain(..).map(|(_, e)| e.cursor.cursor_id).collect();
        tracing::debug!("statement cache cleared");
        ids
    }

    /// Number of cached statements
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn evict_lru(&mut self) -> Option<u32> {
        let key = self
            .entries
            .iter()
            .filter(|(_, e)| !e.in_use)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())?;
        let entry = self.entries.shift_remove(&key)?;
        tracing::trace!(sql = %key, cursor_id = entry.cursor.cursor_id, "evicted cached statement");
        Some(entry.cursor.cursor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(id: u32) -> CachedCursor {
        CachedCursor {
            cursor_id: id,
            columns: None,
        }
    }

    #[test]
    fn test_put_then_reuse_after_release() {
        let mut cache = StatementCache::new(5);
        assert!(cache.put("SELECT 1", cursor(100), StatementType::Query).is_empty());
        // checked out by the statement that prepared it
        assert!(cache.get("SELECT 1").is_none());
        assert!(cache.release("SELECT 1", 100));
        assert_eq!(cache.get("SELECT 1").map(|c| c.cursor_id), Some(100));
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = StatementCache::new(0);
        assert!(cache.put("SELECT 1", cursor(1), StatementType::Query).is_empty());
        assert!(cache.is_empty());
        assert!(cache.get("SELECT 1").is_none());
    }

    #[test]
    fn test_ddl_not_cached() {
        let mut cache = StatementCache::new(5);
        cache.put("CREATE TABLE t (a INT)", cursor(7), StatementType::Ddl);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_returns_cursor() {
        let mut cache = StatementCache::new(2);
        cache.put("SELECT 1", cursor(1), StatementType::Query);
        cache.release("SELECT 1", 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.put("SELECT 2", cursor(2), StatementType::Query);
        cache.release("SELECT 2", 2);

        // touch the first so the second becomes least recently used
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.get("SELECT 1");
        cache.release("SELECT 1", 1);

        let released = cache.put("SELECT 3", cursor(3), StatementType::Query);
        assert_eq!(released, vec![2]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_full_cache_of_busy_cursors() {
        let mut cache = StatementCache::new(1);
        cache.put("SELECT 1", cursor(1), StatementType::Query);
        assert!(cache.put("SELECT 2", cursor(2), StatementType::Query).is_empty());
        assert_eq!(cache.len(), 1);
        // not cached, so the caller keeps ownership
        assert!(!cache.release("SELECT 2", 2));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = StatementCache::new(5);
        cache.put("SELECT 1", cursor(1), StatementType::Query);
        cache.put("SELECT 2", cursor(2), StatementType::Query);
        assert_eq!(cache.invalidate("SELECT 1"), Some(1));
        assert_eq!(cache.invalidate("SELECT 1"), None);
        assert_eq!(cache.clear(), vec![2]);
        assert!(cache.is_empty());
    }
}
