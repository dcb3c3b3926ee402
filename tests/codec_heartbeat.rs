//! Unit tests for heartbeat encoding and decoding in the STOMP codec.

use bytes::BytesMut;
use stomp_stream::{Command, Frame, StompCodec};
use tokio_util::codec::{Decoder, Encoder};

fn next(codec: &mut StompCodec, buf: &mut BytesMut) -> Option<Frame> {
    codec
        .decode(buf)
        .expect("decode failed")
        .map(|item| item.expect("well-formed item"))
}

#[test]
fn decode_single_lf_as_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&[0x0Au8][..]);
    let frame = next(&mut codec, &mut buf).expect("no item");
    assert!(frame.is_heartbeat());
    assert!(
        buf.is_empty(),
        "buffer should be empty after consuming heartbeat"
    );
}

#[test]
fn decode_crlf_as_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r\n"[..]);
    assert!(next(&mut codec, &mut buf).expect("no item").is_heartbeat());
    assert!(buf.is_empty());
}

#[test]
fn lone_cr_waits_for_more_data() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r"[..]);
    assert!(next(&mut codec, &mut buf).is_none());
    assert_eq!(buf.len(), 1);
}

#[test]
fn decode_multiple_consecutive_heartbeats() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&[0x0A, 0x0A, 0x0A][..]);

    for remaining in [2, 1, 0] {
        assert!(next(&mut codec, &mut buf).expect("no item").is_heartbeat());
        assert_eq!(buf.len(), remaining);
    }
    assert!(next(&mut codec, &mut buf).is_none());
}

#[test]
fn decode_heartbeat_before_and_after_frame() {
    let mut codec = StompCodec::new();
    let data = b"\nSEND\ndestination:/queue/test\n\nhello\0\n";
    let mut buf = BytesMut::from(&data[..]);

    assert!(next(&mut codec, &mut buf).unwrap().is_heartbeat());

    let frame = next(&mut codec, &mut buf).unwrap();
    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.body_str(), Some("hello"));

    assert!(next(&mut codec, &mut buf).unwrap().is_heartbeat());
    assert!(next(&mut codec, &mut buf).is_none());
}

#[test]
fn encode_heartbeat_as_single_lf() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(Frame::heartbeat(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"\n");
}

#[test]
fn encoded_heartbeat_decodes_back() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(Frame::heartbeat(), &mut buf).unwrap();
    codec.encode(Frame::send("/q", "x"), &mut buf).unwrap();

    assert!(next(&mut codec, &mut buf).unwrap().is_heartbeat());
    assert_eq!(next(&mut codec, &mut buf).unwrap().destination(), Some("/q"));
}
