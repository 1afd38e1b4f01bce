//! Binding-independent session driver.
//!
//! Every transport turns its byte stream into [`Decoded`] frames behind the
//! [`Transport`] trait and drains a [`ReplyChannel`] back to its client.
//! [`run_session`] owns everything in between: ordering, the handshake,
//! spawning request tasks and cancelling them when the session ends.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::engine::Engine;
use super::protocol::{Decoded, ErrorObject, Inbound, Outgoing, Request, RequestId, Response};
use super::session::Session;
use crate::storage::BoxFuture;
use crate::{AppError, Result};

/// Source of inbound frames for one session.
pub trait Transport: Send {
    /// Suspend until the next frame is decoded; `None` once the peer is done.
    ///
    /// Must be cancel-safe: the driver polls it inside `select!`.
    fn receive(&mut self) -> BoxFuture<'_, Option<Decoded>>;
}

/// Transport fed by another task through a channel.
#[derive(Debug)]
pub struct ChannelTransport {
    frames: mpsc::Receiver<Decoded>,
}

impl ChannelTransport {
    /// Channel transport and the sender that feeds it.
    #[must_use]
    pub fn new(capacity: usize) -> (mpsc::Sender<Decoded>, Self) {
        let (tx, frames) = mpsc::channel(capacity);
        (tx, Self { frames })
    }
}

impl Transport for ChannelTransport {
    fn receive(&mut self) -> BoxFuture<'_, Option<Decoded>> {
        Box::pin(self.frames.recv())
    }
}

/// Outbound path to the session's client.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    tx: mpsc::Sender<Outgoing>,
}

impl ReplyChannel {
    /// Reply channel and the receiver a transport writer drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Deliver a message to the originating session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` once the client side has gone away.
    pub async fn send(&self, message: Outgoing) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AppError::Transport("reply channel closed".into()))
    }

    async fn deliver(&self, message: Outgoing) {
        if let Err(err) = self.send(message).await {
            debug!(%err, "reply dropped");
        }
    }
}

/// Closes its session when dropped; held by transport-side streams so a
/// client disconnect cancels in-flight work.
#[derive(Debug)]
pub struct SessionGuard(pub Arc<Session>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.0.is_closed() {
            debug!(session_id = self.0.id(), "client side dropped; closing session");
            self.0.close();
        }
    }
}

/// Methods handled on the driver loop itself so their effects are visible
/// to every later frame.
fn runs_inline(request: &Request) -> bool {
    request.method == "initialize" || request.method.starts_with("notifications/")
}

fn duplicate_id(id: &RequestId, err: &AppError) -> Response {
    warn!(%id, "request id reused while still in flight");
    Response::failure(Some(id.clone()), ErrorObject::invalid_request(err.to_string()))
}

struct Driver {
    engine: Engine,
    session: Arc<Session>,
    replies: ReplyChannel,
    tasks: JoinSet<()>,
}

impl Driver {
    async fn handle(&mut self, decoded: Decoded) {
        match decoded {
            Decoded::Dropped => {}
            Decoded::Reply(response) => self.replies.deliver(Outgoing::Single(response)).await,
            Decoded::Single(Inbound::Ignored) => {}
            Decoded::Single(Inbound::Rejected(response)) => {
                self.replies.deliver(Outgoing::Single(response)).await;
            }
            Decoded::Single(Inbound::Request(request)) => self.handle_request(request).await,
            Decoded::Batch(items) => self.handle_batch(items).await,
        }
    }

    async fn handle_request(&mut self, request: Request) {
        if runs_inline(&request) {
            let token = self.session.token().child_token();
            if let Some(response) = self.engine.dispatch(&self.session, request, token).await {
                self.replies.deliver(Outgoing::Single(response)).await;
            }
            return;
        }

        let token = match request.id {
            Some(ref id) => match self.session.register(id) {
                Ok(token) => token,
                Err(err) => {
                    let response = duplicate_id(id, &err);
                    self.replies.deliver(Outgoing::Single(response)).await;
                    return;
                }
            },
            None => self.session.token().child_token(),
        };
        let engine = self.engine.clone();
        let session = Arc::clone(&self.session);
        let replies = self.replies.clone();
        self.tasks.spawn(async move {
            let id = request.id.clone();
            let response = engine.dispatch(&session, request, token).await;
            if let Some(ref id) = id {
                session.finish(id);
            }
            if let Some(response) = response {
                replies.deliver(Outgoing::Single(response)).await;
            }
        });
    }

    async fn handle_batch(&mut self, items: Vec<Inbound>) {
        let mut responses: Vec<Response> = Vec::new();
        let mut pending = Vec::new();

        for item in items {
            match item {
                Inbound::Ignored => {}
                Inbound::Rejected(response) => responses.push(response),
                Inbound::Request(request) if runs_inline(&request) => {
                    let token = self.session.token().child_token();
                    if let Some(response) = self.engine.dispatch(&self.session, request, token).await {
                        responses.push(response);
                    }
                }
                Inbound::Request(request) => {
                    let token = match request.id {
                        Some(ref id) => match self.session.register(id) {
                            Ok(token) => token,
                            Err(err) => {
                                responses.push(duplicate_id(id, &err));
                                continue;
                            }
                        },
                        None => self.session.token().child_token(),
                    };
                    pending.push((request, token));
                }
            }
        }

        if pending.is_empty() {
            if !responses.is_empty() {
                self.replies.deliver(Outgoing::Batch(responses)).await;
            }
            return;
        }

        let engine = self.engine.clone();
        let session = Arc::clone(&self.session);
        let replies = self.replies.clone();
        self.tasks.spawn(async move {
            let calls = pending.into_iter().map(|(request, token)| {
                let engine = &engine;
                let session = &session;
                async move {
                    let id = request.id.clone();
                    let response = engine.dispatch(session, request, token).await;
                    if let Some(ref id) = id {
                        session.finish(id);
                    }
                    response
                }
            });
            responses.extend(join_all(calls).await.into_iter().flatten());
            if !responses.is_empty() {
                replies.deliver(Outgoing::Batch(responses)).await;
            }
        });
    }

    async fn drain(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Drive one session until its transport ends, the session is closed from
/// the client side, or `shutdown` fires.
///
/// Requests other than `initialize` and notifications run as their own
/// tasks, each registered with the session before it is spawned so a later
/// `notifications/cancelled` always finds it. When the peer finishes
/// sending, outstanding requests complete and are answered; on cancellation
/// they are cancelled first. Either way the session ends `Closed`.
pub async fn run_session<T: Transport>(
    engine: Engine,
    session: Arc<Session>,
    mut transport: T,
    replies: ReplyChannel,
    shutdown: CancellationToken,
) {
    let span = info_span!(
        "session",
        session_id = session.id(),
        transport = session.transport().as_str()
    );

    async move {
        info!("session opened");
        let mut driver = Driver {
            engine,
            session: Arc::clone(&session),
            replies,
            tasks: JoinSet::new(),
        };

        let graceful = loop {
            tokio::select! {
                () = shutdown.cancelled() => break false,
                () = session.token().cancelled() => break false,
                Some(_) = driver.tasks.join_next(), if !driver.tasks.is_empty() => {}
                frame = transport.receive() => match frame {
                    Some(decoded) => driver.handle(decoded).await,
                    None => break true,
                },
            }
        };

        if graceful {
            debug!(in_flight = session.in_flight(), "peer finished; draining requests");
            driver.drain().await;
            session.close();
        } else {
            debug!(in_flight = session.in_flight(), "session cancelled");
            session.close();
            driver.drain().await;
        }
        info!("session closed");
    }
    .instrument(span)
    .await;
}
