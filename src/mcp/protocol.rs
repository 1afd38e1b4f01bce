//! JSON-RPC 2.0 envelopes, error objects and frame classification.
//!
//! Transports hand raw frames to [`decode_frame`], which never fails: every
//! input becomes either requests to dispatch, an immediate error reply, or
//! nothing at all.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::AppError;

/// Protocol marker required on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error codes carried in [`ErrorObject::code`].
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal server error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// No enabled tool with the requested name.
    pub const TOOL_NOT_FOUND: i32 = -32001;
    /// The tool raised an error, timed out or was cancelled.
    pub const TOOL_EXECUTION_FAILED: i32 = -32002;
    /// No resource with the requested URI.
    pub const RESOURCE_NOT_FOUND: i32 = -32003;
}

/// Request identifier: a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id, kept as the client sent it.
    Number(Number),
    /// String id.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl RequestId {
    /// Read an id from a JSON value; `None` for anything but strings and numbers.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

/// A well-formed inbound request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// `None` marks a notification.
    pub id: Option<RequestId>,
    /// Method name.
    pub method: String,
    /// Parameters; `Value::Null` when omitted.
    pub params: Value,
}

impl Request {
    /// Request expecting a response.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Notification; never answered.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Whether this message expects no response.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Stable machine-readable code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Error with no `data`.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32700`
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, message)
    }

    /// `-32600`
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message)
    }

    /// `-32601`
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    /// Map an application error onto the wire taxonomy.
    ///
    /// Tool failures always carry their message in `data.message`; the
    /// internal `Debug` rendering is added under `data.debug` only when
    /// `debug` is set.
    #[must_use]
    pub fn from_app_error(err: &AppError, debug: bool) -> Self {
        let (code, message, detail) = match err {
            AppError::Protocol(msg) => (error_codes::INVALID_REQUEST, msg.clone(), None),
            AppError::InvalidParams(msg) => {
                (error_codes::INVALID_PARAMS, format!("invalid params: {msg}"), None)
            }
            AppError::ToolNotFound(name) => {
                (error_codes::TOOL_NOT_FOUND, format!("tool not found: {name}"), None)
            }
            AppError::ToolExecution(msg) | AppError::Timeout(msg) | AppError::Cancelled(msg) => (
                error_codes::TOOL_EXECUTION_FAILED,
                "tool execution failed".to_owned(),
                Some(msg.clone()),
            ),
            AppError::ResourceNotFound(uri) | AppError::NotFound(uri) => (
                error_codes::RESOURCE_NOT_FOUND,
                format!("resource not found: {uri}"),
                None,
            ),
            AppError::Config(_)
            | AppError::Transport(_)
            | AppError::DuplicateTool(_)
            | AppError::Storage(_)
            | AppError::Unauthorized(_)
            | AppError::Io(_) => (error_codes::INTERNAL_ERROR, "internal error".to_owned(), None),
        };

        let mut data = Map::new();
        if let Some(detail) = detail {
            data.insert("message".into(), Value::String(detail));
        }
        if debug {
            data.insert("debug".into(), Value::String(format!("{err:?}")));
        }
        Self {
            code,
            message,
            data: (!data.is_empty()).then_some(Value::Object(data)),
        }
    }
}

/// Outbound response envelope; exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the answered request; `null` when it could not be read.
    pub id: Option<RequestId>,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Error code, if this is an error response.
    #[must_use]
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// What a transport writes back for one inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    /// Response to a single request.
    Single(Response),
    /// Responses to a batch, in completion order.
    Batch(Vec<Response>),
}

impl Outgoing {
    /// Compact single-line JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"failed to encode response: {}"}}}}"#,
                error_codes::INTERNAL_ERROR,
                err.to_string().replace('"', "'")
            )
        })
    }
}

/// One element of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Dispatch to the engine.
    Request(Request),
    /// Shape error answered without dispatch.
    Rejected(Response),
    /// Client-sent response or broken notification; logged and skipped.
    Ignored,
}

/// Result of decoding one transport frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A single message.
    Single(Inbound),
    /// A JSON array of messages.
    Batch(Vec<Inbound>),
    /// Immediate reply, e.g. a parse error with a salvaged id.
    Reply(Response),
    /// Unusable frame; nothing to send.
    Dropped,
}

/// Classify raw frame text.
#[must_use]
pub fn decode_frame(raw: &str) -> Decoded {
    if raw.trim().is_empty() {
        return Decoded::Dropped;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) if items.is_empty() => Decoded::Reply(Response::failure(
            None,
            ErrorObject::invalid_request("empty batch"),
        )),
        Ok(Value::Array(items)) => Decoded::Batch(items.into_iter().map(classify).collect()),
        Ok(value) => Decoded::Single(classify(value)),
        Err(err) => match salvage_id(raw) {
            Some(id) => {
                debug!(%id, %err, "malformed frame with recoverable id");
                Decoded::Reply(Response::failure(
                    Some(id),
                    ErrorObject::parse_error(format!("parse error: {err}")),
                ))
            }
            None => {
                warn!(%err, bytes = raw.len(), "dropping malformed frame");
                Decoded::Dropped
            }
        },
    }
}

/// Validate one JSON value as a request envelope.
#[must_use]
pub fn classify(value: Value) -> Inbound {
    let Value::Object(mut obj) = value else {
        return Inbound::Rejected(Response::failure(
            None,
            ErrorObject::invalid_request("request must be an object"),
        ));
    };

    let has_id = obj.contains_key("id");
    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match RequestId::from_value(raw) {
            Some(id) => Some(id),
            None => {
                return Inbound::Rejected(Response::failure(
                    None,
                    ErrorObject::invalid_request("id must be a string, number or null"),
                ))
            }
        },
    };

    let method = obj.get("method").and_then(Value::as_str).map(str::to_owned);

    if method.is_none() && (obj.contains_key("result") || obj.contains_key("error")) {
        debug!(id = ?id, "ignoring response sent by client");
        return Inbound::Ignored;
    }

    let reject = |message: &str| {
        if has_id || method.is_none() {
            Inbound::Rejected(Response::failure(
                id.clone(),
                ErrorObject::invalid_request(message),
            ))
        } else {
            warn!(method = ?method, reason = message, "dropping invalid notification");
            Inbound::Ignored
        }
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return reject("jsonrpc must be \"2.0\"");
    }
    let Some(method) = method.clone().filter(|m| !m.is_empty()) else {
        return reject("method must be a non-empty string");
    };
    let params = obj.remove("params").unwrap_or(Value::Null);
    if !matches!(params, Value::Object(_) | Value::Array(_) | Value::Null) {
        return reject("params must be an object or array");
    }

    Inbound::Request(Request { id, method, params })
}

static ID_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""id"\s*:\s*(-?\d+(?:\.\d+)?|"(?:[^"\\]|\\.)*")"#).ok()
});

/// Best-effort id recovery from text that failed to parse.
///
/// Only an `"id"` member of the outermost object counts; ids nested in
/// `params` belong to the payload, not to the envelope.
#[must_use]
pub fn salvage_id(raw: &str) -> Option<RequestId> {
    let pattern = ID_PATTERN.as_ref()?;
    let mut scanner = NestingScanner::default();
    let literal = pattern.captures_iter(raw).find_map(|caps| {
        let whole = caps.get(0)?;
        scanner.advance_to(raw.as_bytes(), whole.start());
        scanner.at_top_level().then(|| caps.get(1)).flatten()
    })?;
    serde_json::from_str::<Value>(literal.as_str())
        .ok()
        .as_ref()
        .and_then(RequestId::from_value)
}

/// Tracks object/array depth over a prefix of possibly broken JSON.
#[derive(Default)]
struct NestingScanner {
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl NestingScanner {
    fn advance_to(&mut self, bytes: &[u8], end: usize) {
        for &byte in &bytes[self.pos..end] {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }
        self.pos = end;
    }

    fn at_top_level(&self) -> bool {
        !self.in_string && self.depth == 1
    }
}
