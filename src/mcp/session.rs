//! Per-connection session state.
//!
//! A [`Session`] moves `Uninitialized -> Initialized -> Closed`. It owns a
//! cancellation token that parents the token of every in-flight request, so
//! closing the session cancels all outstanding tool calls at once.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::RequestId;
use crate::config::TransportKind;
use crate::{AppError, Result};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Only `initialize` is served on gated transports.
    Uninitialized,
    /// Handshake complete.
    Initialized,
    /// Terminal; further messages are dropped.
    Closed,
}

/// What the client declared during `initialize`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientHello {
    /// `clientInfo` as sent.
    pub client_info: Option<Value>,
    /// `capabilities` as sent.
    pub capabilities: Option<Value>,
    /// Version agreed for this session.
    pub protocol_version: String,
}

/// State shared by the driver loop and the request tasks of one connection.
#[derive(Debug)]
pub struct Session {
    id: String,
    transport: TransportKind,
    state: Mutex<SessionState>,
    hello: Mutex<Option<ClientHello>>,
    token: CancellationToken,
    in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl Session {
    /// New uninitialized session with a random id.
    #[must_use]
    pub fn new(transport: TransportKind) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), transport)
    }

    /// New uninitialized session with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            id: id.into(),
            transport,
            state: Mutex::new(SessionState::Uninitialized),
            hello: Mutex::new(None),
            token: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Transport the session arrived on.
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Handshake data, once initialized.
    #[must_use]
    pub fn hello(&self) -> Option<ClientHello> {
        self.hello
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Session-wide cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Check that `method` may be served in the current state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` before `initialize` on gated transports
    /// and after the session has closed.
    pub fn ensure_ready(&self, method: &str) -> Result<()> {
        match self.state() {
            SessionState::Closed => Err(AppError::Protocol("session is closed".into())),
            SessionState::Uninitialized
                if method != "initialize" && self.transport.requires_initialize() =>
            {
                Err(AppError::Protocol(format!(
                    "session not initialized; {method} requires initialize first"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the session was already initialized
    /// or has closed.
    pub fn mark_initialized(&self, hello: ClientHello) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            SessionState::Uninitialized => {
                *state = SessionState::Initialized;
                *self.hello.lock().unwrap_or_else(PoisonError::into_inner) = Some(hello);
                Ok(())
            }
            SessionState::Initialized => {
                Err(AppError::Protocol("session already initialized".into()))
            }
            SessionState::Closed => Err(AppError::Protocol("session is closed".into())),
        }
    }

    /// Track an in-flight request and return its cancellation token.
    ///
    /// The token is a child of the session token. The entry stays until
    /// [`finish`](Self::finish), even when the request is cancelled, so an id
    /// cannot be reused while its first request is still running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when `id` is already in flight.
    pub fn register(&self, id: &RequestId) -> Result<CancellationToken> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains_key(id) {
            return Err(AppError::Protocol(format!("request id {id} is already in flight")));
        }
        let token = self.token.child_token();
        in_flight.insert(id.clone(), token.clone());
        Ok(token)
    }

    /// Stop tracking a finished request.
    pub fn finish(&self, id: &RequestId) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Cancel one in-flight request; returns whether it was found.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        let token = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of requests currently tracked.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Move to `Closed` and cancel everything still running.
    pub fn close(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SessionState::Closed;
        self.token.cancel();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
