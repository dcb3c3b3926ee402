//! Unit tests for the Frame struct.

use stomp_stream::{Command, Frame, FrameError, Header, HeaderName};

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn frame_new_creates_empty() {
    let frame = Frame::new(Command::Send);
    assert_eq!(frame.command, Command::Send);
    assert!(frame.headers.is_empty());
    assert!(frame.body.is_none());
}

#[test]
fn send_helper_sets_destination_and_body() {
    let frame = Frame::send("/queue/a", "hello");
    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.destination(), Some("/queue/a"));
    assert_eq!(frame.body_str(), Some("hello"));
}

#[test]
fn subscribe_helper_puts_id_before_destination() {
    let frame = Frame::subscribe("/topic/t", "sub-1");
    assert_eq!(frame.headers[0], Header::new(HeaderName::Id, "sub-1"));
    assert_eq!(
        frame.headers[1],
        Header::new(HeaderName::Destination, "/topic/t")
    );
}

#[test]
fn disconnect_helper_asks_for_receipt() {
    let frame = Frame::disconnect("rcpt-9");
    assert_eq!(frame.command, Command::Disconnect);
    assert_eq!(frame.receipt(), Some("rcpt-9"));
}

// =============================================================================
// Builder Pattern Tests
// =============================================================================

#[test]
fn frame_header_builder_keeps_order() {
    let frame = Frame::new(Command::Send)
        .header(HeaderName::Destination, "/queue/test")
        .header("content-type", "text/plain")
        .header("custom-header", "custom-value");
    assert_eq!(frame.headers.len(), 3);
    assert_eq!(frame.headers[0].key(), "destination");
    assert_eq!(frame.headers[1].key(), "content-type");
    assert_eq!(frame.headers[2].key(), "custom-header");
}

#[test]
fn empty_body_is_none() {
    let frame = Frame::new(Command::Send).set_body(Vec::new());
    assert!(frame.body.is_none());
}

#[test]
fn get_header_returns_first_occurrence() {
    let frame = Frame::new(Command::Message)
        .header("x", "first")
        .header("x", "second");
    assert_eq!(frame.get_header("x"), Some("first"));
    assert_eq!(frame.get_header("missing"), None);
}

// =============================================================================
// Serialization Tests
// =============================================================================

#[test]
fn serialize_layout() {
    let frame = Frame::send("/queue/a", "hi");
    assert_eq!(frame.serialize(), b"SEND\ndestination:/queue/a\n\nhi\0".to_vec());
}

#[test]
fn serialize_without_body() {
    let frame = Frame::unsubscribe("7");
    assert_eq!(frame.serialize(), b"UNSUBSCRIBE\nid:7\n\n\0".to_vec());
}

#[test]
fn heartbeat_serializes_to_single_lf() {
    assert_eq!(Frame::heartbeat().serialize(), b"\n".to_vec());
}

#[test]
fn connect_goes_out_as_stomp() {
    let frame = Frame::new(Command::Connect).header(HeaderName::AcceptVersion, "1.2");
    assert!(frame.serialize().starts_with(b"STOMP\naccept-version:1.2\n"));
}

#[test]
fn body_with_nul_gets_content_length() {
    let frame = Frame::send("/q", vec![b'a', 0, b'b']);
    let bytes = frame.serialize();
    assert_eq!(
        bytes,
        b"SEND\ndestination:/q\ncontent-length:3\n\na\0b\0".to_vec()
    );
}

#[test]
fn explicit_content_length_is_not_duplicated() {
    let frame = Frame::send("/q", vec![0u8]).header(HeaderName::ContentLength, "1");
    let text = frame.serialize();
    let count = text
        .windows(b"content-length".len())
        .filter(|w| *w == b"content-length")
        .count();
    assert_eq!(count, 1);
}

// =============================================================================
// Parsing Tests
// =============================================================================

#[test]
fn parse_message_frame() {
    let frame =
        Frame::parse(b"MESSAGE\ndestination:/queue/a\nmessage-id:1\n\npayload\0").unwrap();
    assert_eq!(frame.command, Command::Message);
    assert_eq!(frame.destination(), Some("/queue/a"));
    assert_eq!(frame.get_header("message-id"), Some("1"));
    assert_eq!(frame.body_str(), Some("payload"));
}

#[test]
fn parse_empty_input_fails() {
    assert_eq!(Frame::parse(b""), Err(FrameError::Empty));
}

#[test]
fn parse_lone_lf_is_heartbeat() {
    assert!(Frame::parse(b"\n").unwrap().is_heartbeat());
    assert!(Frame::parse(b"\r\n").unwrap().is_heartbeat());
}

#[test]
fn parse_unknown_command_fails() {
    assert_eq!(
        Frame::parse(b"BOGUS\n\n\0"),
        Err(FrameError::UnknownCommand("BOGUS".to_string()))
    );
}

#[test]
fn parse_accepts_crlf_line_endings() {
    let frame = Frame::parse(b"RECEIPT\r\nreceipt-id:77\r\n\r\n\0").unwrap();
    assert_eq!(frame.command, Command::Receipt);
    assert_eq!(frame.get_header("receipt-id"), Some("77"));
    assert!(frame.body.is_none());
}

#[test]
fn parse_skips_header_line_without_colon() {
    let frame = Frame::parse(b"MESSAGE\ngarbage\ndestination:/q\n\n\0").unwrap();
    assert_eq!(frame.headers.len(), 1);
    assert_eq!(frame.destination(), Some("/q"));
}

#[test]
fn parse_splits_at_first_colon_only() {
    let frame = Frame::parse(b"CONNECTED\nserver:broker:1.0\n\n\0").unwrap();
    assert_eq!(frame.get_header("server"), Some("broker:1.0"));
}

#[test]
fn parse_rejects_invalid_utf8_header() {
    let err = Frame::parse(b"MESSAGE\nkey:\xff\xfe\n\n\0").unwrap_err();
    assert_eq!(err, FrameError::InvalidUtf8("header value"));
}

#[test]
fn parse_keeps_binary_body() {
    let frame = Frame::parse(b"MESSAGE\n\n\x01\x02\xff\0").unwrap();
    assert_eq!(frame.body, Some(vec![1, 2, 0xff]));
    assert_eq!(frame.body_str(), None);
}

#[test]
fn round_trip_preserves_frame() {
    let frame = Frame::new(Command::Message)
        .header(HeaderName::Destination, "/topic/prices")
        .header(HeaderName::Subscription, "sub-1")
        .header("x-ratio", "3:4")
        .header("x-note", "line1\nline2")
        .set_body("tick");
    assert_eq!(Frame::parse(&frame.serialize()).unwrap(), frame);
}

#[test]
fn error_frame_message_accessor() {
    let frame = Frame::parse(b"ERROR\nmessage:bad login\n\ndetails\0").unwrap();
    assert!(frame.command.is_system());
    assert_eq!(frame.message(), Some("bad login"));
    assert_eq!(frame.body_str(), Some("details"));
}

#[test]
fn command_display_and_parse() {
    assert_eq!(Command::Connect.to_string(), "STOMP");
    assert_eq!(Command::Heartbeat.to_string(), "HEARTBEAT");
    assert_eq!("RECEIPT".parse::<Command>(), Ok(Command::Receipt));
    assert!(!Command::Message.is_system());
}
