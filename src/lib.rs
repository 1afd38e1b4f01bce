#![forbid(unsafe_code)]
//! MCP protocol server core: JSON-RPC over stdio, SSE and streaming HTTP,
//! backed by a tool registry and an embedded storage engine.

pub mod config;
pub mod config_manager;
pub mod config_watcher;
pub mod errors;
pub mod mcp;
pub mod registry;
pub mod storage;
pub mod tools;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
