//! Server-Sent Events transport.
//!
//! `GET /sse` opens a session and streams replies as `message` events after
//! an initial `endpoint` event naming the POST URL for that session.
//! `POST /message?session_id=<id>` feeds one JSON-RPC frame into it.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::http::HttpState;
use super::protocol::{decode_frame, Decoded};
use super::session::Session;
use super::transport::{run_session, ChannelTransport, ReplyChannel, SessionGuard};
use crate::config::TransportKind;

/// Open SSE sessions by id.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: RwLock<HashMap<String, mpsc::Sender<Decoded>>>,
}

impl SessionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: String, tx: mpsc::Sender<Decoded>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
    }

    fn get(&self, id: &str) -> Option<mpsc::Sender<Decoded>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn remove(&self, id: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Query string of `POST /message`.
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Session to deliver to.
    pub session_id: String,
}

/// `GET /sse`
pub async fn connect(State(state): State<HttpState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let config = state.engine.config().current();
    let capacity = config.transport.channel_capacity;
    let session = Arc::new(Session::new(TransportKind::Sse));
    let id = session.id().to_owned();

    let (frames_tx, transport) = ChannelTransport::new(capacity);
    let (replies, outbound) = ReplyChannel::new(capacity);
    state.sse_sessions.insert(id.clone(), frames_tx);

    let driver_state = state.clone();
    let driver_session = Arc::clone(&session);
    tokio::spawn(async move {
        let id = driver_session.id().to_owned();
        run_session(
            driver_state.engine.clone(),
            driver_session,
            transport,
            replies,
            driver_state.shutdown.clone(),
        )
        .await;
        driver_state.sse_sessions.remove(&id);
    });

    info!(session_id = %id, "sse client connected");
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?session_id={id}"));
    let messages = stream::unfold(
        (outbound, SessionGuard(session)),
        |(mut outbound, guard)| async move {
            let message = outbound.recv().await?;
            let event = Event::default().event("message").data(message.to_json());
            Some((Ok::<_, Infallible>(event), (outbound, guard)))
        },
    );

    Sse::new(stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages)).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(config.transport.sse_keepalive_seconds)),
    )
}

/// `POST /message?session_id=<id>`
pub async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> StatusCode {
    let Some(tx) = state.sse_sessions.get(&query.session_id) else {
        debug!(session_id = %query.session_id, "message for unknown session");
        return StatusCode::NOT_FOUND;
    };
    let max = state.engine.config().current().transport.max_frame_bytes;
    if body.len() > max {
        return StatusCode::PAYLOAD_TOO_LARGE;
    }
    match decode_frame(&body) {
        Decoded::Dropped => StatusCode::BAD_REQUEST,
        decoded => match tx.send(decoded).await {
            Ok(()) => StatusCode::ACCEPTED,
            Err(_) => StatusCode::NOT_FOUND,
        },
    }
}
