//! Stdio transport over an in-process duplex pipe.

use std::time::Duration;

use persona_mcp::mcp::stdio::serve_io;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{test_config, test_engine};

/// Write `input`, close the client side, and collect everything the server wrote.
async fn exchange(input: &[u8]) -> String {
    let engine = test_engine(test_config(), Vec::new());
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let server = tokio::spawn(serve_io(
        engine,
        server_read,
        server_write,
        CancellationToken::new(),
    ));

    let (mut client_read, mut client_write) = tokio::io::split(client);
    client_write.write_all(input).await.expect("write");
    client_write.shutdown().await.expect("shutdown");

    let mut output = String::new();
    tokio::time::timeout(Duration::from_secs(5), client_read.read_to_string(&mut output))
        .await
        .expect("server finishes")
        .expect("read");
    server.await.expect("joins").expect("serve_io succeeds");
    output
}

fn parse_lines(output: &str) -> Vec<Value> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("JSON line"))
        .collect()
}

#[tokio::test]
async fn ndjson_requests_are_answered_without_initialize() {
    let output = exchange(
        b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{\"name\":\"calculator_add\",\"arguments\":{\"a\":5,\"b\":3}}}\n",
    )
    .await;
    let responses = parse_lines(&output);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[0]["result"]["content"][0]["text"], "8");
}

#[tokio::test]
async fn content_length_frames_are_answered_in_kind() {
    let body = r#"{"jsonrpc":"2.0","id":"x","method":"ping"}"#;
    let input = format!("Content-Length: {}\r\n\r\n{body}", body.len());
    let output = exchange(input.as_bytes()).await;

    let (headers, payload) = output.split_once("\r\n\r\n").expect("header block");
    assert!(headers.starts_with("Content-Length: "));
    let length: usize = headers["Content-Length: ".len()..].parse().expect("length");
    assert_eq!(length, payload.len());
    let response: Value = serde_json::from_str(payload).expect("JSON body");
    assert_eq!(response["id"], "x");
    assert_eq!(response["result"], serde_json::json!({}));
}

#[tokio::test]
async fn every_request_gets_exactly_one_response() {
    let input = (1..=5)
        .map(|i| format!("{{\"jsonrpc\":\"2.0\",\"id\":{i},\"method\":\"ping\"}}\n"))
        .chain(std::iter::once(
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n".to_owned(),
        ))
        .collect::<String>();
    let output = exchange(input.as_bytes()).await;

    let mut ids: Vec<i64> = parse_lines(&output)
        .iter()
        .map(|r| r["id"].as_i64().expect("numeric id"))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn garbage_lines_do_not_end_the_session() {
    let input = b"this is not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n";
    let responses = parse_lines(&exchange(input).await);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["id"], 2);
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"prompts/list\"}\n";
    let responses = parse_lines(&exchange(input).await);
    assert_eq!(responses[0]["error"]["code"], -32601);
}
