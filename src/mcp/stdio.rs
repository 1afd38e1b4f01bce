//! Stdio transport: one session for the life of the process.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::{Frame, McpCodec};
use super::engine::Engine;
use super::protocol::{decode_frame, Decoded};
use super::session::Session;
use super::transport::{run_session, ReplyChannel, Transport};
use crate::config::TransportKind;
use crate::storage::BoxFuture;
use crate::Result;

/// Frames read from any byte stream with [`McpCodec`].
pub struct StreamTransport<R> {
    frames: FramedRead<R, McpCodec>,
}

impl<R: AsyncRead + Unpin + Send> StreamTransport<R> {
    /// Read frames from `reader`.
    #[must_use]
    pub fn new(reader: R, codec: McpCodec) -> Self {
        Self {
            frames: FramedRead::new(reader, codec),
        }
    }
}

impl<R: AsyncRead + Unpin + Send> Transport for StreamTransport<R> {
    fn receive(&mut self) -> BoxFuture<'_, Option<Decoded>> {
        Box::pin(async move {
            loop {
                match self.frames.next().await? {
                    Ok(Frame::Message(text)) => match decode_frame(&text) {
                        Decoded::Dropped => {}
                        decoded => return Some(decoded),
                    },
                    Ok(Frame::Rejected(reason)) => warn!(%reason, "inbound frame rejected"),
                    Err(err) => {
                        warn!(%err, "inbound stream failed");
                        return None;
                    }
                }
            }
        })
    }
}

/// Serve one session over an arbitrary reader/writer pair.
///
/// Returns once the reader reaches EOF and every outstanding request has
/// been answered, or once `shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Io` if flushing the writer fails at the end.
pub async fn serve_io<R, W>(
    engine: Engine,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let config = engine.config().current();
    let codec = McpCodec::new(config.transport.max_frame_bytes);
    let (replies, mut outbound) = ReplyChannel::new(config.transport.channel_capacity);

    let mut sink = FramedWrite::new(writer, codec.clone());
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if let Err(err) = sink.send(message.to_json()).await {
                warn!(%err, "failed to write response; stopping writer");
                break;
            }
        }
        sink.close().await
    });

    let session = Arc::new(Session::new(TransportKind::Stdio));
    run_session(
        engine,
        session,
        StreamTransport::new(reader, codec),
        replies,
        shutdown,
    )
    .await;

    match writer_task.await {
        Ok(result) => result,
        Err(err) => {
            debug!(%err, "stdio writer task ended abnormally");
            Ok(())
        }
    }
}

/// Serve MCP over this process's stdin and stdout.
///
/// # Errors
///
/// Returns `AppError::Io` if stdout cannot be flushed on exit.
pub async fn serve_stdio(engine: Engine, shutdown: CancellationToken) -> Result<()> {
    info!("starting stdio MCP transport");
    serve_io(engine, tokio::io::stdin(), tokio::io::stdout(), shutdown).await?;
    info!("stdio MCP transport shut down");
    Ok(())
}
