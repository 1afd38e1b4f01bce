//! Frame codec for the stdio and http-stream transports.
//!
//! Each inbound frame is either one line of JSON (NDJSON) or a
//! `Content-Length:` header block followed by exactly that many bytes, as
//! used by LSP-style clients. The framing is detected per frame and the
//! encoder answers in whichever framing the client used last.
//!
//! Oversized or non-UTF-8 frames never fail the stream: they surface as
//! [`Frame::Rejected`] and the bytes are skipped, because an error from a
//! decoder ends a [`tokio_util::codec::FramedRead`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Upper bound on a `Content-Length` header block.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const CONTENT_LENGTH: &[u8] = b"content-length:";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Complete frame text.
    Message(String),
    /// Unusable frame that was skipped, with the reason.
    Rejected(String),
}

#[derive(Debug, Default)]
struct Framing {
    content_length: AtomicBool,
}

/// NDJSON / `Content-Length` codec with a frame size limit.
#[derive(Debug, Clone)]
pub struct McpCodec {
    max_frame_bytes: usize,
    framing: Arc<Framing>,
    /// Bytes of an oversized body still to discard.
    skip_body: usize,
    /// Discarding an oversized line up to its newline.
    skip_line: bool,
    /// Position to resume the newline search from.
    next_index: usize,
}

impl McpCodec {
    /// Codec accepting frames up to `max_frame_bytes`.
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            framing: Arc::new(Framing::default()),
            skip_body: 0,
            skip_line: false,
            next_index: 0,
        }
    }

    /// Whether the encoder currently writes `Content-Length` frames.
    #[must_use]
    pub fn uses_content_length(&self) -> bool {
        self.framing.content_length.load(Ordering::Relaxed)
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> Option<Frame> {
        let newline = src[self.next_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| self.next_index + offset);

        let Some(end) = newline else {
            if src.len() > self.max_frame_bytes {
                let len = src.len();
                src.clear();
                self.next_index = 0;
                self.skip_line = true;
                return Some(Frame::Rejected(format!(
                    "frame exceeds {} bytes (at least {len})",
                    self.max_frame_bytes
                )));
            }
            self.next_index = src.len();
            return None;
        };

        self.next_index = 0;
        let line = src.split_to(end + 1);
        if std::mem::take(&mut self.skip_line) {
            return Some(Frame::Rejected("tail of oversized frame skipped".into()));
        }
        let line = trim_line(&line);
        if line.len() > self.max_frame_bytes {
            return Some(Frame::Rejected(format!(
                "frame exceeds {} bytes ({})",
                self.max_frame_bytes,
                line.len()
            )));
        }
        self.framing.content_length.store(false, Ordering::Relaxed);
        Some(to_frame(line))
    }

    fn decode_headers(&mut self, src: &mut BytesMut) -> Option<Frame> {
        let Some((header_len, body_start)) = find_header_end(src) else {
            if src.len() > MAX_HEADER_BYTES {
                src.clear();
                return Some(Frame::Rejected("header block too large".into()));
            }
            return None;
        };

        let length = match parse_content_length(&src[..header_len]) {
            Ok(length) => length,
            Err(reason) => {
                src.advance(body_start);
                return Some(Frame::Rejected(reason));
            }
        };

        if length > self.max_frame_bytes {
            src.advance(body_start);
            let available = src.len().min(length);
            src.advance(available);
            self.skip_body = length - available;
            return Some(Frame::Rejected(format!(
                "frame exceeds {} bytes ({length})",
                self.max_frame_bytes
            )));
        }

        if src.len() < body_start + length {
            src.reserve(body_start + length - src.len());
            return None;
        }

        src.advance(body_start);
        let body = src.split_to(length);
        self.framing.content_length.store(true, Ordering::Relaxed);
        Some(to_frame(&body))
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

fn to_frame(bytes: &[u8]) -> Frame {
    match std::str::from_utf8(bytes) {
        Ok(text) => Frame::Message(text.to_owned()),
        Err(err) => Frame::Rejected(format!("frame is not UTF-8: {err}")),
    }
}

fn find_header_end(src: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = src.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    src.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

fn parse_content_length(headers: &[u8]) -> std::result::Result<usize, String> {
    let text = std::str::from_utf8(headers).map_err(|_| "header block is not UTF-8".to_owned())?;
    text.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim())
        })
        .ok_or_else(|| "missing Content-Length header".to_owned())?
        .parse::<usize>()
        .map_err(|err| format!("invalid Content-Length: {err}"))
}

fn starts_with_header(src: &[u8]) -> bool {
    let n = src.len().min(CONTENT_LENGTH.len());
    src[..n].eq_ignore_ascii_case(&CONTENT_LENGTH[..n])
}

impl Decoder for McpCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            if self.skip_body > 0 {
                let n = self.skip_body.min(src.len());
                src.advance(n);
                self.skip_body -= n;
                if self.skip_body > 0 {
                    return Ok(None);
                }
            }

            let at_frame_start = !self.skip_line && self.next_index == 0;
            if at_frame_start {
                let leading = src
                    .iter()
                    .take_while(|b| b.is_ascii_whitespace())
                    .count();
                src.advance(leading);
            }
            if src.is_empty() {
                return Ok(None);
            }

            let header = at_frame_start && starts_with_header(src);
            // Not enough bytes yet to tell the framings apart.
            if header && src.len() < CONTENT_LENGTH.len() {
                return Ok(None);
            }

            let frame = if header {
                self.decode_headers(src)
            } else {
                self.decode_line(src)
            };
            match frame {
                Some(Frame::Message(text)) if text.trim().is_empty() => {}
                Some(frame) => return Ok(Some(frame)),
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() || self.skip_body > 0 {
            src.clear();
            return Ok(None);
        }
        // Final line without a trailing newline.
        self.next_index = 0;
        let rest = src.split_to(src.len());
        if std::mem::take(&mut self.skip_line) {
            return Ok(None);
        }
        let line = trim_line(&rest);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        if starts_with_header(line) {
            return Ok(Some(Frame::Rejected("truncated Content-Length frame".into())));
        }
        Ok(Some(to_frame(line)))
    }
}

impl Encoder<String> for McpCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        if self.uses_content_length() {
            let header = format!("Content-Length: {}\r\n\r\n", item.len());
            dst.reserve(header.len() + item.len());
            dst.put_slice(header.as_bytes());
            dst.put_slice(item.as_bytes());
        } else {
            dst.reserve(item.len() + 1);
            dst.put_slice(item.as_bytes());
            dst.put_u8(b'\n');
        }
        Ok(())
    }
}
