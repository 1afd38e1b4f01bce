//! Engine-level dispatch: handshake, listing, tool calls and resources.

use std::sync::Arc;

use persona_mcp::config::TransportKind;
use persona_mcp::mcp::protocol::{error_codes, Request, RequestId};
use persona_mcp::mcp::session::{Session, SessionState};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{call, initialize, test_config, test_engine, FailingTool, PanicTool};

fn text_of(result: &Value) -> &str {
    result["content"][0]["text"].as_str().expect("text content")
}

#[tokio::test]
async fn initialize_reports_server_info_and_capabilities() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Sse);

    let response = engine
        .dispatch(&session, initialize(1), CancellationToken::new())
        .await
        .expect("initialize answers");

    let result = response.result.expect("success");
    assert_eq!(result["protocolVersion"], "2025-06-18");
    assert_eq!(result["serverInfo"]["name"], "persona-mcp");
    assert_eq!(result["capabilities"]["tools"]["listChanged"], true);
    assert_eq!(session.state(), SessionState::Initialized);
    assert_eq!(
        session.hello().expect("hello stored").client_info,
        Some(json!({"name": "test-client", "version": "1.0"}))
    );
}

#[tokio::test]
async fn unknown_protocol_version_negotiates_latest() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    let request = Request::new(1, "initialize", json!({"protocolVersion": "1999-01-01"}));

    let response = engine
        .dispatch(&session, request, CancellationToken::new())
        .await
        .expect("answered");
    assert_eq!(response.result.expect("success")["protocolVersion"], "2025-06-18");
}

#[tokio::test]
async fn ping_returns_empty_object() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    let response = engine
        .dispatch(&session, Request::new(9, "ping", Value::Null), CancellationToken::new())
        .await
        .expect("answered");
    assert_eq!(response.id, Some(RequestId::from(9)));
    assert_eq!(response.result, Some(json!({})));
}

#[tokio::test]
async fn tools_list_contains_builtins_with_schemas() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    let response = engine
        .dispatch(&session, Request::new(2, "tools/list", Value::Null), CancellationToken::new())
        .await
        .expect("answered");

    let result = response.result.expect("success");
    let tools = result["tools"].as_array().expect("array");
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"calculator_add"));
    assert!(names.contains(&"storage_query"));
    for tool in tools {
        assert_eq!(tool["inputSchema"]["type"], "object", "{tool}");
    }
}

#[tokio::test]
async fn storage_tools_round_trip_through_dispatch() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    let ct = CancellationToken::new;

    let put = engine
        .dispatch(
            &session,
            call(1, "storage_put", json!({"collection": "personas", "key": "ada", "value": {"role": "mentor"}})),
            ct(),
        )
        .await
        .expect("answered");
    assert!(put.error.is_none(), "{put:?}");

    let get = engine
        .dispatch(&session, call(2, "storage_get", json!({"collection": "personas", "key": "ada"})), ct())
        .await
        .expect("answered");
    let value: Value = serde_json::from_str(text_of(&get.result.expect("success"))).expect("json text");
    assert_eq!(value, json!({"role": "mentor"}));

    let read = engine
        .dispatch(
            &session,
            Request::new(3, "resources/read", json!({"uri": "storage://personas/ada"})),
            ct(),
        )
        .await
        .expect("answered");
    let contents = &read.result.expect("success")["contents"][0];
    assert_eq!(contents["uri"], "storage://personas/ada");
    assert_eq!(contents["mimeType"], "application/json");
}

#[tokio::test]
async fn missing_storage_key_is_a_tool_execution_failure() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    let response = engine
        .dispatch(
            &session,
            call(4, "storage_get", json!({"collection": "personas", "key": "nobody"})),
            CancellationToken::new(),
        )
        .await
        .expect("answered");
    let error = response.error.expect("error");
    assert_eq!(error.code, error_codes::TOOL_EXECUTION_FAILED);
    assert!(error.data.expect("data")["message"]
        .as_str()
        .expect("message")
        .contains("nobody"));
}

#[tokio::test]
async fn oversized_cache_ttl_still_answers_the_call() {
    let mut config = test_config();
    config.tools.cache_ttl_seconds = u64::MAX;
    let engine = test_engine(config, Vec::new());
    let session = Session::new(TransportKind::Stdio);

    let task = tokio::spawn(async move {
        engine
            .dispatch(&session, call(2, "calculator_add", json!({"a": 1, "b": 2})), CancellationToken::new())
            .await
    });
    let response = task.await.expect("dispatch does not panic").expect("answered");

    assert_eq!(response.id, Some(RequestId::from(2)));
    assert_eq!(text_of(&response.result.expect("success")), "3");
}

#[tokio::test]
async fn tool_failures_map_to_execution_errors() {
    let engine = test_engine(
        test_config(),
        vec![Arc::new(PanicTool::new()), Arc::new(FailingTool::new())],
    );
    let session = Session::new(TransportKind::Stdio);

    for name in ["panic_probe", "failing_probe"] {
        let response = engine
            .dispatch(&session, call(1, name, json!({})), CancellationToken::new())
            .await
            .expect("answered");
        assert_eq!(
            response.error_code(),
            Some(error_codes::TOOL_EXECUTION_FAILED),
            "{name}"
        );
    }

    // A panicking tool does not poison the engine.
    let response = engine
        .dispatch(&session, call(2, "calculator_add", json!({"a": 1, "b": 2})), CancellationToken::new())
        .await
        .expect("answered");
    assert!(response.error.is_none());
}

#[tokio::test]
async fn debug_mode_attaches_internal_detail() {
    let mut config = test_config();
    config.server.debug = true;
    let engine = test_engine(config, vec![Arc::new(FailingTool::new())]);
    let session = Session::new(TransportKind::Stdio);

    let response = engine
        .dispatch(&session, call(1, "failing_probe", json!({})), CancellationToken::new())
        .await
        .expect("answered");
    let data = response.error.expect("error").data.expect("data");
    assert!(data.get("debug").is_some());
}

#[tokio::test]
async fn arguments_must_be_present_and_an_object() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);

    for params in [
        json!({"name": "calculator_add"}),
        json!({"name": "calculator_add", "arguments": [1, 2]}),
        json!({"arguments": {}}),
    ] {
        let response = engine
            .dispatch(&session, Request::new(1, "tools/call", params.clone()), CancellationToken::new())
            .await
            .expect("answered");
        assert_eq!(response.error_code(), Some(error_codes::INVALID_PARAMS), "{params}");
    }
}

#[tokio::test]
async fn master_switch_hides_and_blocks_tools() {
    let mut config = test_config();
    config.tools.enabled = false;
    let engine = test_engine(config, Vec::new());
    let session = Session::new(TransportKind::Stdio);

    let list = engine
        .dispatch(&session, Request::new(1, "tools/list", Value::Null), CancellationToken::new())
        .await
        .expect("answered");
    assert_eq!(list.result.expect("success")["tools"], json!([]));

    let response = engine
        .dispatch(&session, call(2, "calculator_add", json!({"a": 1, "b": 1})), CancellationToken::new())
        .await
        .expect("answered");
    assert_eq!(response.error_code(), Some(error_codes::TOOL_NOT_FOUND));
}

#[tokio::test]
async fn notifications_never_produce_responses() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);

    let initialized = engine
        .dispatch(
            &session,
            Request::notification("notifications/initialized", Value::Null),
            CancellationToken::new(),
        )
        .await;
    assert!(initialized.is_none());

    let unknown = engine
        .dispatch(&session, Request::notification("no/such", Value::Null), CancellationToken::new())
        .await;
    assert!(unknown.is_none());
}

#[tokio::test]
async fn closed_session_drops_requests() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    session.close();
    let response = engine
        .dispatch(&session, Request::new(1, "ping", Value::Null), CancellationToken::new())
        .await;
    assert!(response.is_none());
}

#[tokio::test]
async fn unknown_resource_uri_is_resource_not_found() {
    let engine = test_engine(test_config(), Vec::new());
    let session = Session::new(TransportKind::Stdio);
    for uri in ["prompt://missing", "storage://personas/missing"] {
        let response = engine
            .dispatch(
                &session,
                Request::new(1, "resources/read", json!({"uri": uri})),
                CancellationToken::new(),
            )
            .await
            .expect("answered");
        assert_eq!(response.error_code(), Some(error_codes::RESOURCE_NOT_FOUND), "{uri}");
    }
}
