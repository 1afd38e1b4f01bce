//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Byte-level transport failure (bind, read, write, framing).
    Transport(String),
    /// Malformed JSON-RPC envelope or protocol state violation.
    Protocol(String),
    /// Request parameters failed validation.
    InvalidParams(String),
    /// The named tool is not registered or is disabled.
    ToolNotFound(String),
    /// A tool raised an error while executing.
    ToolExecution(String),
    /// The requested resource URI is unknown.
    ResourceNotFound(String),
    /// Two tools were registered under the same name.
    DuplicateTool(String),
    /// Storage backend failure.
    Storage(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The owning session closed or the request was cancelled.
    Cancelled(String),
    /// The operation exceeded its deadline.
    Timeout(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::ToolNotFound(msg) => write!(f, "tool not found: {msg}"),
            Self::ToolExecution(msg) => write!(f, "tool execution failed: {msg}"),
            Self::ResourceNotFound(msg) => write!(f, "resource not found: {msg}"),
            Self::DuplicateTool(msg) => write!(f, "duplicate tool: {msg}"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
