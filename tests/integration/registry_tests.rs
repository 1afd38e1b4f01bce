//! Registry behaviour under concurrency, deadlines, cancellation and
//! runtime enablement changes.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use persona_mcp::registry::Origin;
use persona_mcp::AppError;
use serde_json::json;

use super::test_helpers::{test_config, test_manager, test_registry, tool_context, ProbeTool};

#[tokio::test]
async fn non_reentrant_tool_runs_one_call_at_a_time() {
    let probe = ProbeTool::new("serial_probe", "general", Duration::from_millis(50));
    let peak = probe.peak();
    let manager = test_manager(test_config());
    let registry = test_registry(&manager, vec![Arc::new(probe)]);

    let calls = (0..4).map(|i| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let handle = registry.resolve("serial_probe").await.expect("resolves");
            registry
                .invoke(handle, json!({"i": i}), tool_context(&registry))
                .await
        })
    });
    for call in futures_util::future::join_all(calls).await {
        call.expect("task joins").expect("call succeeds");
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reentrant_tool_calls_overlap() {
    let probe = ProbeTool::new("parallel_probe", "general", Duration::from_millis(200)).reentrant();
    let peak = probe.peak();
    let manager = test_manager(test_config());
    let registry = test_registry(&manager, vec![Arc::new(probe)]);

    let calls = (0..3).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let handle = registry.resolve("parallel_probe").await.expect("resolves");
            registry.invoke(handle, json!({}), tool_context(&registry)).await
        })
    });
    for call in futures_util::future::join_all(calls).await {
        call.expect("task joins").expect("call succeeds");
    }
    assert!(peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn category_timeout_is_enforced() {
    let mut config = test_config();
    config.tools.category_timeouts.insert("slow".into(), 1);
    let manager = test_manager(config);
    let probe = ProbeTool::new("slow_probe", "slow", Duration::from_secs(30)).reentrant();
    let registry = test_registry(&manager, vec![Arc::new(probe)]);

    let handle = registry.resolve("slow_probe").await.expect("resolves");
    let err = registry
        .invoke(handle, json!({}), tool_context(&registry))
        .await
        .expect_err("times out");
    assert!(matches!(err, AppError::Timeout(_)), "{err}");
}

#[tokio::test]
async fn cancellation_stops_a_running_call() {
    let manager = test_manager(test_config());
    let probe = ProbeTool::new("long_probe", "general", Duration::from_secs(30)).reentrant();
    let registry = test_registry(&manager, vec![Arc::new(probe)]);

    let ctx = tool_context(&registry);
    let cancel = ctx.cancel.clone();
    let handle = registry.resolve("long_probe").await.expect("resolves");
    let call = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.invoke(handle, json!({}), ctx).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("finishes promptly")
        .expect("task joins")
        .expect_err("cancelled");
    assert!(matches!(err, AppError::Cancelled(_)), "{err}");
}

#[tokio::test]
async fn cacheable_results_are_memoized_until_ttl() {
    let mut config = test_config();
    config.tools.cache_ttl_seconds = 60;
    let manager = test_manager(config);
    let probe = ProbeTool::new("cached_probe", "general", Duration::from_millis(1))
        .reentrant()
        .cacheable();
    let calls = probe.calls();
    let registry = test_registry(&manager, vec![Arc::new(probe)]);

    for _ in 0..3 {
        let handle = registry.resolve("cached_probe").await.expect("resolves");
        registry
            .invoke(handle, json!({"q": 1}), tool_context(&registry))
            .await
            .expect("call succeeds");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let handle = registry.resolve("cached_probe").await.expect("resolves");
    registry
        .invoke(handle, json!({"q": 2}), tool_context(&registry))
        .await
        .expect("call succeeds");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(registry.cache().len(), 2);
}

#[tokio::test]
async fn uncacheable_tools_always_run() {
    let mut config = test_config();
    config.tools.cache_ttl_seconds = 60;
    let manager = test_manager(config);
    let probe = ProbeTool::new("fresh_probe", "general", Duration::from_millis(1)).reentrant();
    let calls = probe.calls();
    let registry = test_registry(&manager, vec![Arc::new(probe)]);

    for _ in 0..2 {
        let handle = registry.resolve("fresh_probe").await.expect("resolves");
        registry
            .invoke(handle, json!({}), tool_context(&registry))
            .await
            .expect("call succeeds");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(registry.cache().is_empty());
}

#[tokio::test]
async fn runtime_toggles_hide_tools_and_categories() {
    let manager = test_manager(test_config());
    let registry = test_registry(&manager, Vec::new());

    registry
        .set_tool_enabled("calculator_add", false)
        .await
        .expect("known tool");
    assert!(matches!(
        registry.resolve("calculator_add").await,
        Err(AppError::ToolNotFound(_))
    ));
    assert!(!registry.list().await.iter().any(|t| t.name == "calculator_add"));

    let affected = registry.set_category_enabled("storage", false).await;
    assert_eq!(affected, 4);
    assert!(registry.resolve("storage_get").await.is_err());

    registry.set_category_enabled("storage", true).await;
    registry
        .set_tool_enabled("calculator_add", true)
        .await
        .expect("known tool");
    assert_eq!(registry.list().await.len(), 6);

    let err = registry
        .set_tool_enabled("nope", false)
        .await
        .expect_err("unknown tool");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn statuses_include_disabled_tools() {
    let mut config = test_config();
    config.tools.disabled = vec!["calculator_multiply".into()];
    let manager = test_manager(config);
    let registry = test_registry(&manager, Vec::new());

    let statuses = registry.statuses().await;
    assert_eq!(statuses.len(), 6);
    let multiply = statuses
        .iter()
        .find(|s| s.name == "calculator_multiply")
        .expect("listed");
    assert!(!multiply.enabled);
    assert_eq!(multiply.origin, Origin::Builtin);
    assert_eq!(registry.list().await.len(), 5);
}

#[tokio::test]
async fn apply_config_discards_runtime_toggles() {
    let config = test_config();
    let manager = test_manager(config.clone());
    let registry = test_registry(&manager, Vec::new());

    registry
        .set_tool_enabled("calculator_add", false)
        .await
        .expect("known tool");
    registry.apply_config(&config).await;
    assert!(registry.resolve("calculator_add").await.is_ok());
}
