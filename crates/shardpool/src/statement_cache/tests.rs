//! Tests for the statement cache

use std::sync::Arc;

use pretty_assertions::assert_eq;
use shardpool_core::StatementOptions;

use super::*;
use crate::testing::{MockState, MockStatement};

fn statement(sql: &str, state: &Arc<MockState>) -> Box<dyn RawStatement> {
    Box::new(MockStatement::new(sql, state.clone()))
}

fn key(sql: &str) -> StatementKey {
    StatementKey::new(sql, &StatementOptions::default())
}

#[tokio::test]
async fn test_put_then_get_is_a_hit() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(2);

    cache.put(key("SELECT 1"), statement("SELECT 1", &state)).await;
    let hit = cache.get(&key("SELECT 1")).expect("cached statement");

    assert_eq!(hit.sql(), "SELECT 1");
    assert!(cache.get(&key("SELECT 1")).is_none());
    assert_eq!(state.statements_closed(), 0);
}

#[tokio::test]
async fn test_full_key_closes_extra_statements() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(2);

    for _ in 0..3 {
        cache.put(key("SELECT 1"), statement("SELECT 1", &state)).await;
    }

    assert_eq!(cache.len(), 2);
    assert_eq!(state.statements_closed(), 1);
}

#[tokio::test]
async fn test_zero_size_disables_caching() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(0);

    cache.put(key("SELECT 1"), statement("SELECT 1", &state)).await;

    assert!(!cache.is_enabled());
    assert!(cache.get(&key("SELECT 1")).is_none());
    assert_eq!(state.statements_closed(), 1);
}

#[test]
fn test_key_normalizes_whitespace_and_respects_options() {
    assert_eq!(key("SELECT  *\n FROM t"), key("SELECT * FROM t"));
    assert_ne!(
        key("CALL refresh()"),
        StatementKey::new("CALL refresh()", &StatementOptions::callable())
    );
}

#[tokio::test]
async fn test_options_keep_entries_apart() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(1);
    let scrollable = StatementOptions::default().with_scrollable(true);

    cache
        .put(
            StatementKey::new("SELECT 1", &scrollable),
            statement("SELECT 1", &state),
        )
        .await;

    assert!(cache.get(&key("SELECT 1")).is_none());
    assert!(cache.get(&StatementKey::new("SELECT 1", &scrollable)).is_some());
}

#[tokio::test]
async fn test_keys_falling_off_recent_ring_are_evicted() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(1);

    cache.put(key("SELECT 0"), statement("SELECT 0", &state)).await;
    for i in 1..=RECENT_KEYS_CAPACITY {
        let sql = format!("SELECT {i}");
        cache.put(key(&sql), statement(&sql, &state)).await;
    }

    assert!(cache.get(&key("SELECT 0")).is_none());
    assert_eq!(state.statements_closed(), 1);
    assert_eq!(cache.len(), RECENT_KEYS_CAPACITY);
}

#[tokio::test]
async fn test_recently_reused_key_survives_rotation() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(1);

    cache.put(key("SELECT 0"), statement("SELECT 0", &state)).await;
    for i in 1..RECENT_KEYS_CAPACITY {
        let sql = format!("SELECT {i}");
        cache.put(key(&sql), statement(&sql, &state)).await;
    }
    // Touch the first key again before it would rotate out
    let reused = cache.get(&key("SELECT 0")).expect("still cached");
    cache.put(key("SELECT 0"), reused).await;

    cache.put(key("SELECT new"), statement("SELECT new", &state)).await;

    // The oldest ring slot now belongs to "SELECT 1"
    assert!(cache.get(&key("SELECT 0")).is_some());
    assert!(cache.get(&key("SELECT 1")).is_none());
    assert_eq!(state.statements_closed(), 1);
}

#[tokio::test]
async fn test_clear_closes_everything() {
    let state = Arc::new(MockState::default());
    let cache = StatementCache::new(4);

    cache.put(key("SELECT 1"), statement("SELECT 1", &state)).await;
    cache.put(key("SELECT 2"), statement("SELECT 2", &state)).await;
    cache.clear().await;

    assert_eq!(cache.len(), 0);
    assert_eq!(state.statements_closed(), 2);
}
