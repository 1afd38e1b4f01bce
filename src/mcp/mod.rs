//! Model Context Protocol server layer.
//!
//! [`protocol`] and [`codec`] turn bytes into JSON-RPC messages, [`engine`]
//! routes them, [`transport`] drives one session, and [`stdio`], [`sse`]
//! and [`http_stream`] bind sessions to the outside world.

pub mod admin;
pub mod codec;
pub mod engine;
pub mod http;
pub mod http_stream;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod sse;
pub mod stdio;
pub mod transport;
