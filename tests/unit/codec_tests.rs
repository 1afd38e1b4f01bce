//! Frame detection, size limits and reply framing of the stdio codec.

use bytes::BytesMut;
use persona_mcp::mcp::codec::{Frame, McpCodec, MAX_HEADER_BYTES};
use tokio_util::codec::{Decoder, Encoder};

fn drain(codec: &mut McpCodec, buf: &mut BytesMut) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buf).expect("decode never fails") {
        frames.push(frame);
    }
    frames
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"{\"jsonrpc\":"[..]);
    assert!(drain(&mut codec, &mut buf).is_empty());
    buf.extend_from_slice(b"\"2.0\"}\r\n");
    assert_eq!(
        drain(&mut codec, &mut buf),
        vec![Frame::Message("{\"jsonrpc\":\"2.0\"}".into())]
    );
}

#[test]
fn blank_lines_between_frames_are_skipped() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"\n\n{}\n\r\n  \n[]\n"[..]);
    assert_eq!(
        drain(&mut codec, &mut buf),
        vec![Frame::Message("{}".into()), Frame::Message("[]".into())]
    );
}

#[test]
fn content_length_body_split_across_reads() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"Content-Length: 12\r\n\r\n{\"id\""[..]);
    assert!(drain(&mut codec, &mut buf).is_empty());
    buf.extend_from_slice(b":12345}");
    assert_eq!(
        drain(&mut codec, &mut buf),
        vec![Frame::Message("{\"id\":12345}".into())]
    );
    assert!(codec.uses_content_length());
}

#[test]
fn header_name_is_case_insensitive_and_extra_headers_are_allowed() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(
        &b"content-length: 2\r\nContent-Type: application/vscode-jsonrpc\r\n\r\n{}"[..],
    );
    assert_eq!(drain(&mut codec, &mut buf), vec![Frame::Message("{}".into())]);
}

#[test]
fn bad_content_length_is_rejected_without_ending_the_stream() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"Content-Length: lots\r\n\r\n{}\n"[..]);
    let frames = drain(&mut codec, &mut buf);
    assert!(matches!(frames[0], Frame::Rejected(ref reason) if reason.contains("Content-Length")));
    assert_eq!(frames[1], Frame::Message("{}".into()));
}

#[test]
fn oversized_header_block_is_rejected() {
    let mut codec = McpCodec::new(1024);
    let mut raw = b"Content-Length: 2\r\n".to_vec();
    raw.extend(std::iter::repeat(b'x').take(MAX_HEADER_BYTES + 1));
    let mut buf = BytesMut::from(&raw[..]);
    assert!(matches!(
        codec.decode(&mut buf).expect("decode"),
        Some(Frame::Rejected(_))
    ));
}

#[test]
fn invalid_utf8_is_rejected() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"\xff\xfe\n{}\n"[..]);
    let frames = drain(&mut codec, &mut buf);
    assert!(matches!(frames[0], Frame::Rejected(_)));
    assert_eq!(frames[1], Frame::Message("{}".into()));
}

#[test]
fn final_line_without_newline_is_emitted_at_eof() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"{\"last\":true}"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode_eof"),
        Some(Frame::Message("{\"last\":true}".into()))
    );
}

#[test]
fn truncated_content_length_frame_is_reported_at_eof() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"Content-Length: 40\r\n\r\n{\"id\":"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert!(matches!(
        codec.decode_eof(&mut buf).expect("decode_eof"),
        Some(Frame::Rejected(_))
    ));
}

#[test]
fn encoder_switches_back_to_newlines() {
    let mut codec = McpCodec::new(1024);
    let mut buf = BytesMut::from(&b"Content-Length: 2\r\n\r\n{}{}\n"[..]);
    drain(&mut codec, &mut buf);
    assert!(!codec.uses_content_length());

    let mut out = BytesMut::new();
    codec.encode("{\"ok\":1}".to_owned(), &mut out).expect("encode");
    assert_eq!(&out[..], b"{\"ok\":1}\n");
}

#[test]
fn clones_share_framing_state() {
    let mut reader = McpCodec::new(1024);
    let mut writer = reader.clone();
    let mut buf = BytesMut::from(&b"Content-Length: 2\r\n\r\n{}"[..]);
    drain(&mut reader, &mut buf);

    let mut out = BytesMut::new();
    writer.encode("[]".to_owned(), &mut out).expect("encode");
    assert_eq!(&out[..], b"Content-Length: 2\r\n\r\n[]");
}
