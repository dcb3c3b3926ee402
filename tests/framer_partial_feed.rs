//! Feeding the framer in arbitrary pieces must never change what it decodes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stomp_stream::{Command, Frame, FrameError, Framer, HeaderName};

fn sample_frames() -> Vec<Frame> {
    vec![
        Frame::send("/queue/a", "first"),
        Frame::heartbeat(),
        Frame::new(Command::Message)
            .header(HeaderName::Destination, "/topic/b")
            .header(HeaderName::MessageId, "m-1")
            .header("x-colon", "a:b")
            .set_body("second"),
        Frame::new(Command::Receipt).header(HeaderName::ReceiptId, "rcpt-1"),
        Frame::send("/queue/bin", vec![1u8, 0, 2, 0, 3]),
        Frame::new(Command::Error)
            .header(HeaderName::Message, "oops")
            .set_body("details"),
    ]
}

fn wire(frames: &[Frame]) -> Vec<u8> {
    frames.iter().flat_map(Frame::serialize).collect()
}

fn ok_frames(items: Vec<Result<Frame, FrameError>>) -> Vec<Frame> {
    items
        .into_iter()
        .map(|item| item.expect("well-formed frame"))
        .collect()
}

/// Drop the `content-length` header the serializer adds to NUL-carrying
/// bodies so decoded frames compare equal to the originals.
fn without_added_length(mut frame: Frame) -> Frame {
    frame.headers.retain(|h| h.name != HeaderName::ContentLength);
    frame
}

#[test]
fn byte_by_byte_content_length() {
    let mut framer = Framer::new();
    let raw = b"SEND\ncontent-length:5\n\nhel\0o\0";

    for (i, b) in raw.iter().enumerate() {
        let items = framer.feed(std::slice::from_ref(b));
        if i < raw.len() - 1 {
            assert!(items.is_empty(), "framer produced item too early at byte {}", i);
        } else {
            let frames = ok_frames(items);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].body, Some(b"hel\0o".to_vec()));
        }
    }
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn small_chunk_null_terminated() {
    let mut framer = Framer::new();
    let raw = b"SEND\n\nchunked body\0";

    let mut decoded = Vec::new();
    for (n, chunk) in raw.chunks(3).enumerate() {
        let items = framer.feed(chunk);
        if (n + 1) * 3 < raw.len() {
            assert!(items.is_empty(), "framer produced item too early at chunk {}", n);
        }
        decoded.extend(ok_frames(items));
    }
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].body_str(), Some("chunked body"));
}

#[test]
fn remainder_is_kept_between_feeds() {
    let mut framer = Framer::new();
    let items = framer.feed(b"SEND\ndestination:/q\n\nfirst\0SEND\ndest");
    assert_eq!(ok_frames(items).len(), 1);
    assert_eq!(framer.buffered(), b"SEND\ndest".len());

    let frames = ok_frames(framer.feed(b"ination:/r\n\nsecond\0"));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].destination(), Some("/r"));
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn random_splits_decode_same_frames() {
    let frames = sample_frames();
    let bytes = wire(&frames);
    let expected: Vec<Frame> = frames.into_iter().map(without_added_length).collect();

    let mut rng = StdRng::seed_from_u64(0x5701_4d);
    for _ in 0..200 {
        let mut framer = Framer::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let len = rng.gen_range(1..=16).min(bytes.len() - offset);
            decoded.extend(ok_frames(framer.feed(&bytes[offset..offset + len])));
            offset += len;
        }
        let decoded: Vec<Frame> = decoded.into_iter().map(without_added_length).collect();
        assert_eq!(decoded, expected);
        assert_eq!(framer.buffered(), 0);
    }
}

#[test]
fn every_single_split_point_decodes_same_frames() {
    let frames = sample_frames();
    let bytes = wire(&frames);
    let expected: Vec<Frame> = frames.into_iter().map(without_added_length).collect();

    for split in 0..=bytes.len() {
        let mut framer = Framer::new();
        let mut decoded = ok_frames(framer.feed(&bytes[..split]));
        decoded.extend(ok_frames(framer.feed(&bytes[split..])));
        let decoded: Vec<Frame> = decoded.into_iter().map(without_added_length).collect();
        assert_eq!(decoded, expected, "split at {}", split);
    }
}

#[test]
fn malformed_slice_does_not_hide_following_frame() {
    let mut framer = Framer::new();
    let items = framer.feed(b"NOPE\n\n\0SEND\ndestination:/q\n\nok\0");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], Err(FrameError::UnknownCommand("NOPE".to_string())));
    let frame = items[1].as_ref().expect("good frame after bad one");
    assert_eq!(frame.body_str(), Some("ok"));
}

#[test]
fn content_length_mismatch_skips_to_next_nul() {
    let mut framer = Framer::new();
    let items = framer.feed(b"SEND\ncontent-length:2\n\nlonger\0SEND\n\nnext\0");
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Err(FrameError::ContentLength(_))));
    assert_eq!(items[1].as_ref().unwrap().body_str(), Some("next"));
}

#[test]
fn invalid_content_length_value_is_reported() {
    let mut framer = Framer::new();
    let items = framer.feed(b"SEND\ncontent-length:abc\n\nbody\0");
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(FrameError::ContentLength(_))));
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn overflowing_content_length_does_not_hide_following_frame() {
    let mut framer = Framer::with_max_frame_size(usize::MAX);
    let items = framer.feed(
        b"MESSAGE\ncontent-length:18446744073709551615\n\nabc\0MESSAGE\ndestination:/q\n\nok\0",
    );
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Err(FrameError::ContentLength(_))));
    assert_eq!(items[1].as_ref().unwrap().body_str(), Some("ok"));
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn content_length_over_limit_is_not_buffered() {
    let mut framer = Framer::with_max_frame_size(64);
    let items = framer.feed(b"MESSAGE\ncontent-length:1000000\n\nabc\0MESSAGE\n\nnext\0");
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], Err(FrameError::ContentLength(_))));
    assert_eq!(items[1].as_ref().unwrap().body_str(), Some("next"));
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn heartbeats_between_frames() {
    let mut framer = Framer::new();
    let frames = ok_frames(framer.feed(b"\n\nSEND\n\nx\0\r\n"));
    let commands: Vec<Command> = frames.iter().map(|f| f.command).collect();
    assert_eq!(
        commands,
        vec![
            Command::Heartbeat,
            Command::Heartbeat,
            Command::Send,
            Command::Heartbeat
        ]
    );
}
