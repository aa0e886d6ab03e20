//! Per-connection cache of prepared statements
//!
//! Statements are grouped by [`StatementKey`] (normalized SQL plus execution
//! options). Each key holds at most `statements_cache_size` idle statements.
//! A key stays in the cache only while it appears in a fixed-size ring of
//! recently used keys; once it falls off the ring its statements are closed.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use shardpool_core::{RawStatement, StatementOptions};

/// Number of recently used keys that keep their cache entries alive.
pub(crate) const RECENT_KEYS_CAPACITY: usize = 64;

/// Identity of a cached statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StatementKey {
    sql: String,
    options: StatementOptions,
}

impl StatementKey {
    pub fn new(sql: &str, options: &StatementOptions) -> Self {
        Self {
            sql: normalize_sql(sql),
            options: options.clone(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Collapse runs of whitespace so formatting differences share an entry.
fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Arc<StatementKey>, VecDeque<Box<dyn RawStatement>>>,
    recent: VecDeque<Arc<StatementKey>>,
}

pub(crate) struct StatementCache {
    per_key_capacity: usize,
    state: Mutex<CacheState>,
}

impl StatementCache {
    pub fn new(per_key_capacity: usize) -> Self {
        Self {
            per_key_capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.per_key_capacity > 0
    }

    /// Take an idle statement for `key`, if one is cached.
    pub fn get(&self, key: &StatementKey) -> Option<Box<dyn RawStatement>> {
        if !self.is_enabled() {
            return None;
        }
        self.state.lock().entries.get_mut(key)?.pop_front()
    }

    /// Return a statement to the cache.
    ///
    /// Statements that do not fit, and statements of keys pushed out of the
    /// recent ring, are closed.
    pub async fn put(&self, key: StatementKey, statement: Box<dyn RawStatement>) {
        for rejected in self.offer(key, statement) {
            close_statement(rejected).await;
        }
    }

    /// Synchronous half of [`StatementCache::put`]; returns the statements
    /// the caller must close.
    pub fn offer(
        &self,
        key: StatementKey,
        statement: Box<dyn RawStatement>,
    ) -> Vec<Box<dyn RawStatement>> {
        if !self.is_enabled() {
            return vec![statement];
        }

        let mut state = self.state.lock();
        let mut rejected = Vec::new();

        let key = match state.entries.get_key_value(&key) {
            Some((existing, _)) => existing.clone(),
            None => Arc::new(key),
        };

        if state.recent.len() >= RECENT_KEYS_CAPACITY
            && let Some(oldest) = state.recent.pop_front()
        {
            // The map's own key plus the popped slot: no other ring reference
            if Arc::strong_count(&oldest) == 2 && !Arc::ptr_eq(&oldest, &key) {
                if let Some(evicted) = state.entries.remove(&*oldest) {
                    rejected.extend(evicted);
                }
            }
        }
        state.recent.push_back(key.clone());

        let per_key_capacity = self.per_key_capacity;
        let queue = state.entries.entry(key).or_default();
        if queue.len() >= per_key_capacity {
            rejected.push(statement);
        } else {
            queue.push_back(statement);
        }
        rejected
    }

    /// Number of idle statements held across all keys.
    pub fn len(&self) -> usize {
        self.state.lock().entries.values().map(VecDeque::len).sum()
    }

    /// Remove and close every cached statement.
    pub async fn clear(&self) {
        let drained: Vec<Box<dyn RawStatement>> = {
            let mut state = self.state.lock();
            state.recent.clear();
            state.entries.drain().flat_map(|(_, queue)| queue).collect()
        };
        for statement in drained {
            close_statement(statement).await;
        }
    }
}

pub(crate) async fn close_statement(statement: Box<dyn RawStatement>) {
    let sql = statement.sql().to_string();
    if let Err(e) = statement.close().await {
        tracing::debug!(sql = %sql, error = %e, "failed to close cached statement");
    }
}

#[cfg(test)]
mod tests;
