//! Streaming HTTP transport: `POST /mcp` with NDJSON in both directions.
//!
//! One request is one session. Frames are decoded as the request body
//! arrives and replies are written to the response body as they complete.
//! The end of the request body drains outstanding calls and ends the
//! response; dropping the response cancels them.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use super::codec::{Frame, McpCodec};
use super::http::HttpState;
use super::protocol::{decode_frame, Decoded};
use super::session::Session;
use super::transport::{run_session, ChannelTransport, ReplyChannel, SessionGuard};
use crate::config::TransportKind;

/// Response media type.
pub const NDJSON: &str = "application/x-ndjson";

/// `POST /mcp`
pub async fn stream(State(state): State<HttpState>, body: Body) -> Response {
    let config = state.engine.config().current();
    let capacity = config.transport.channel_capacity;
    let session = Arc::new(Session::new(TransportKind::HttpStream));
    let (frames_tx, transport) = ChannelTransport::new(capacity);
    let (replies, outbound) = ReplyChannel::new(capacity);

    let bytes = body.into_data_stream().map_err(std::io::Error::other);
    let mut frames = FramedRead::new(
        StreamReader::new(bytes),
        McpCodec::new(config.transport.max_frame_bytes),
    );
    let reader_session = Arc::clone(&session);
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                () = reader_session.token().cancelled() => break,
                next = frames.next() => next,
            };
            match next {
                None => break,
                Some(Ok(Frame::Message(text))) => match decode_frame(&text) {
                    Decoded::Dropped => {}
                    decoded => {
                        if frames_tx.send(decoded).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Frame::Rejected(reason))) => warn!(%reason, "inbound frame rejected"),
                Some(Err(err)) => {
                    warn!(%err, "request body failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(run_session(
        state.engine.clone(),
        Arc::clone(&session),
        transport,
        replies,
        state.shutdown.clone(),
    ));

    info!(session_id = session.id(), "http-stream session opened");
    let lines = stream::unfold(
        (outbound, SessionGuard(session)),
        |(mut outbound, guard)| async move {
            let message = outbound.recv().await?;
            let mut line = message.to_json();
            line.push('\n');
            Some((Ok::<_, Infallible>(Bytes::from(line)), (outbound, guard)))
        },
    );

    ([(CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}
