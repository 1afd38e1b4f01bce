//! JSON-RPC method routing.
//!
//! | Method                      | Handler                                   |
//! |-----------------------------|-------------------------------------------|
//! | `initialize`                | version negotiation, session handshake    |
//! | `ping`                      | empty result                              |
//! | `tools/list`                | enabled tools                             |
//! | `tools/call`                | schema validation, then registry invoke   |
//! | `tools/refresh`             | re-run discovery                          |
//! | `resources/list`            | registered and discovered resources       |
//! | `resources/read`            | resource or `storage://` contents         |
//! | `notifications/initialized` | accepted silently                         |
//! | `notifications/cancelled`   | cancels `params.requestId` in the session |

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::protocol::{ErrorObject, Request, RequestId, Response};
use super::schema;
use super::session::{ClientHello, Session};
use crate::config_manager::ConfigManager;
use crate::registry::{ToolContext, ToolRegistry};
use crate::{AppError, Result};

/// Protocol revisions this server speaks, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2024-11-05", "2025-03-26", "2025-06-18"];

/// Revision offered when the client asks for one we do not know.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Pick the revision to answer `initialize` with.
#[must_use]
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .map(str::trim)
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Copy of `value` with credential-like keys masked, for audit logs.
#[must_use]
pub fn redact_audit_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String("[REDACTED]".into()))
                    } else {
                        (key.clone(), redact_audit_value(item))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_audit_value).collect()),
        _ => value.clone(),
    }
}

/// Whether a parameter name looks like it holds a credential.
#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    ["token", "secret", "password", "credential", "api_key", "apikey", "authorization"]
        .iter()
        .any(|needle| normalized.contains(needle))
}

/// Routes requests for every session of the process.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<ToolRegistry>,
    config: Arc<ConfigManager>,
}

impl Engine {
    /// Engine over a built registry.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<ConfigManager>) -> Self {
        Self { registry, config }
    }

    /// Tool registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Configuration owner.
    #[must_use]
    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// Map an error with the current debug setting.
    #[must_use]
    pub fn error_object(&self, err: &AppError) -> ErrorObject {
        ErrorObject::from_app_error(err, self.config.current().server.debug)
    }

    /// Handle one request; `None` for notifications and closed sessions.
    pub async fn dispatch(
        &self,
        session: &Session,
        request: Request,
        cancel: CancellationToken,
    ) -> Option<Response> {
        if session.is_closed() {
            debug!(session_id = session.id(), method = %request.method, "dropping message for closed session");
            return None;
        }

        let started = Instant::now();
        let Request { id, method, params } = request;
        let audit_params = redact_audit_value(&params);
        let notification = id.is_none();

        let outcome = match session.ensure_ready(&method) {
            Ok(()) => self.route(session, &method, id.as_ref(), params, cancel).await,
            Err(err) => Err(self.error_object(&err)),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            session_id = session.id(),
            method = %method,
            id = ?id,
            params = %audit_params,
            outcome = if outcome.is_ok() { "success" } else { "failure" },
            elapsed_ms,
            "mcp request audited"
        );

        if notification {
            if let Err(err) = outcome {
                warn!(method = %method, code = err.code, message = %err.message, "notification failed");
            }
            return None;
        }

        Some(match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::failure(id, error),
        })
    }

    async fn route(
        &self,
        session: &Session,
        method: &str,
        id: Option<&RequestId>,
        params: Value,
        cancel: CancellationToken,
    ) -> std::result::Result<Value, ErrorObject> {
        let result = match method {
            "initialize" => self.initialize(session, &params),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.list().await })),
            "tools/call" => self.call_tool(session, id, params, cancel).await,
            "tools/refresh" => self
                .registry
                .refresh()
                .await
                .map(|summary| json!(summary)),
            "resources/list" => Ok(json!({ "resources": self.registry.resources().await })),
            "resources/read" => self.read_resource(&params).await,
            "notifications/initialized" => Ok(Value::Null),
            "notifications/cancelled" => {
                cancel_notification(session, &params);
                Ok(Value::Null)
            }
            other => return Err(ErrorObject::method_not_found(other)),
        };
        result.map_err(|err| self.error_object(&err))
    }

    fn initialize(&self, session: &Session, params: &Value) -> Result<Value> {
        let version =
            negotiate_protocol_version(params.get("protocolVersion").and_then(Value::as_str));
        session.mark_initialized(ClientHello {
            client_info: params.get("clientInfo").cloned(),
            capabilities: params.get("capabilities").cloned(),
            protocol_version: version.to_owned(),
        })?;

        let config = self.config.current();
        info!(
            session_id = session.id(),
            protocol_version = version,
            client = ?params.get("clientInfo"),
            "session initialized"
        );
        Ok(json!({
            "protocolVersion": version,
            "serverInfo": {
                "name": config.server.name,
                "version": config.server.version,
            },
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": {},
            },
        }))
    }

    async fn call_tool(
        &self,
        session: &Session,
        id: Option<&RequestId>,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let Value::Object(mut params) = params else {
            return Err(AppError::InvalidParams("params must be an object".into()));
        };
        let name = match params.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err(AppError::InvalidParams("name must be a non-empty string".into())),
        };
        let arguments = match params.remove("arguments") {
            Some(args @ Value::Object(_)) => args,
            Some(_) => return Err(AppError::InvalidParams("arguments must be an object".into())),
            None => return Err(AppError::InvalidParams("arguments is required".into())),
        };

        let handle = self.registry.resolve(&name).await?;
        schema::validate(&handle.spec().input_schema, &arguments)?;

        let ctx = ToolContext {
            session_id: session.id().to_owned(),
            request_id: id.cloned(),
            cancel,
            storage: self.registry.storage().clone(),
        };
        let span = info_span!("tool_call", tool = %name, request_id = ?id);
        let output = self
            .registry
            .invoke(handle, arguments, ctx)
            .instrument(span)
            .await?;
        Ok(output.to_value())
    }

    async fn read_resource(&self, params: &Value) -> Result<Value> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| AppError::InvalidParams("uri must be a non-empty string".into()))?;
        let contents = self.registry.read_resource(uri).await?;
        Ok(json!({ "contents": [contents] }))
    }
}

fn cancel_notification(session: &Session, params: &Value) {
    match params.get("requestId").and_then(RequestId::from_value) {
        Some(target) => {
            let found = session.cancel_request(&target);
            info!(session_id = session.id(), request_id = %target, found, "cancellation requested");
        }
        None => warn!(session_id = session.id(), "notifications/cancelled without requestId"),
    }
}
