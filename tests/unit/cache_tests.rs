//! Result cache keys, expiry and the background sweeper.

use std::sync::Arc;
use std::time::Duration;

use persona_mcp::registry::cache::{cache_key, spawn_cache_sweeper, ResultCache};
use persona_mcp::registry::tool::ToolOutput;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[test]
fn key_is_stable_hex_digest() {
    let key = cache_key("calculator_add", &json!({"a": 1, "b": 2}));
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(key, cache_key("calculator_add", &json!({"b": 2, "a": 1})));
    assert_ne!(key, cache_key("calculator_add", &json!({"a": 1, "b": 3})));
}

#[test]
fn zero_ttl_entries_are_never_served() {
    let cache = ResultCache::new();
    cache.insert("k".into(), ToolOutput::text("v"), Duration::ZERO);
    assert!(cache.get("k").is_none());
}

#[test]
fn purge_drops_only_expired_entries() {
    let cache = ResultCache::new();
    cache.insert("old".into(), ToolOutput::text("a"), Duration::ZERO);
    cache.insert("new".into(), ToolOutput::text("b"), Duration::from_secs(60));
    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("new"), Some(ToolOutput::text("b")));

    cache.clear();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn sweeper_purges_until_cancelled() {
    let cache = Arc::new(ResultCache::new());
    let cancel = CancellationToken::new();
    let handle = spawn_cache_sweeper(Arc::clone(&cache), Duration::from_millis(20), cancel.clone());

    cache.insert("stale".into(), ToolOutput::text("x"), Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.is_empty());

    cancel.cancel();
    handle.await.expect("sweeper exits cleanly");
}
