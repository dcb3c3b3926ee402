use bytes::{BufMut, BytesMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::{self, FromStr};
use thiserror::Error;
use tracing::debug;

/// Errors raised while turning raw bytes into a [`Frame`].
///
/// A `FrameError` only ever concerns one frame slice; the framer reports it
/// and carries on with the bytes that follow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The input contained no bytes at all.
    #[error("received frame is empty")]
    Empty,
    /// The command line did not match any known command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),
    /// The command line or a header was not valid UTF-8.
    #[error("invalid utf8 in {0}")]
    InvalidUtf8(&'static str),
    /// A header contained an escape sequence STOMP 1.2 does not define.
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    /// The `content-length` header was unusable or did not match the body.
    #[error("content-length error: {0}")]
    ContentLength(String),
}

/// STOMP commands understood by the client.
///
/// `Heartbeat` is not a real command: it stands for the bare line feed
/// exchanged as a keep-alive and never carries headers or a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake. Sent on the wire as `STOMP`.
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Send,
    Connected,
    Disconnected,
    Message,
    Error,
    Receipt,
    Heartbeat,
}

impl Command {
    /// Wire representation of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "STOMP",
            Command::Disconnect => "DISCONNECT",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Connected => "CONNECTED",
            Command::Disconnected => "DISCONNECTED",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
            Command::Receipt => "RECEIPT",
            Command::Heartbeat => "\n",
        }
    }

    /// Frames the connection state machine interprets itself.
    pub fn is_system(&self) -> bool {
        matches!(self, Command::Connected | Command::Error)
    }

    // STOMP 1.2: header escaping does not apply to CONNECT and CONNECTED.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let command = match token {
            "STOMP" => Command::Connect,
            "DISCONNECT" => Command::Disconnect,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "CONNECTED" => Command::Connected,
            "DISCONNECTED" => Command::Disconnected,
            "MESSAGE" => Command::Message,
            "ERROR" => Command::Error,
            "RECEIPT" => Command::Receipt,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Heartbeat => f.write_str("HEARTBEAT"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Header names with a dedicated meaning, plus `Custom` for everything else.
///
/// Two names are equal when their wire strings are equal, so
/// `HeaderName::Custom("host".into())` and `HeaderName::Host` compare equal.
#[derive(Debug, Clone)]
pub enum HeaderName {
    Host,
    Login,
    Passcode,
    AcceptVersion,
    HeartBeat,
    Destination,
    Id,
    Receipt,
    ReceiptId,
    Version,
    Subscription,
    MessageId,
    ContentLength,
    ContentType,
    Message,
    UserName,
    DeviceId,
    Custom(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Host => "host",
            HeaderName::Login => "login",
            HeaderName::Passcode => "passcode",
            HeaderName::AcceptVersion => "accept-version",
            HeaderName::HeartBeat => "heart-beat",
            HeaderName::Destination => "destination",
            HeaderName::Id => "id",
            HeaderName::Receipt => "receipt",
            HeaderName::ReceiptId => "receipt-id",
            HeaderName::Version => "version",
            HeaderName::Subscription => "subscription",
            HeaderName::MessageId => "message-id",
            HeaderName::ContentLength => "content-length",
            HeaderName::ContentType => "content-type",
            HeaderName::Message => "message",
            HeaderName::UserName => "user-name",
            HeaderName::DeviceId => "device_id",
            HeaderName::Custom(name) => name,
        }
    }
}

impl From<&str> for HeaderName {
    fn from(name: &str) -> Self {
        match name {
            "host" => HeaderName::Host,
            "login" => HeaderName::Login,
            "passcode" => HeaderName::Passcode,
            "accept-version" => HeaderName::AcceptVersion,
            "heart-beat" => HeaderName::HeartBeat,
            "destination" => HeaderName::Destination,
            "id" => HeaderName::Id,
            "receipt" => HeaderName::Receipt,
            "receipt-id" => HeaderName::ReceiptId,
            "version" => HeaderName::Version,
            "subscription" => HeaderName::Subscription,
            "message-id" => HeaderName::MessageId,
            "content-length" => HeaderName::ContentLength,
            "content-type" => HeaderName::ContentType,
            "message" => HeaderName::Message,
            "user-name" => HeaderName::UserName,
            "device_id" => HeaderName::DeviceId,
            other => HeaderName::Custom(other.to_string()),
        }
    }
}

impl From<String> for HeaderName {
    fn from(name: String) -> Self {
        match HeaderName::from(name.as_str()) {
            HeaderName::Custom(_) => HeaderName::Custom(name),
            known => known,
        }
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `name:value` header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &str {
        self.name.as_str()
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A STOMP frame: command, ordered headers and an optional body.
///
/// Headers are kept in the order they were added or received. Duplicate
/// names are allowed; lookups return the first occurrence, which is the one
/// STOMP 1.2 says must win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command
    pub command: Command,
    /// Ordered headers
    pub headers: Vec<Header>,
    /// Raw body bytes; `None` when the frame has no body
    pub body: Option<Vec<u8>>,
}

impl Frame {
    /// Create a frame with the given command and no headers or body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: None,
        }
    }

    /// The keep-alive pseudo-frame (a single LF on the wire).
    pub fn heartbeat() -> Self {
        Self::new(Command::Heartbeat)
    }

    /// Build a SEND frame for `destination` carrying `body`.
    pub fn send(destination: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Send)
            .header(HeaderName::Destination, destination)
            .set_body(body)
    }

    /// Build a SUBSCRIBE frame for `destination` using subscription `id`.
    pub fn subscribe(destination: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(Command::Subscribe)
            .header(HeaderName::Id, id)
            .header(HeaderName::Destination, destination)
    }

    /// Build an UNSUBSCRIBE frame for subscription `id`.
    pub fn unsubscribe(id: impl Into<String>) -> Self {
        Self::new(Command::Unsubscribe).header(HeaderName::Id, id)
    }

    /// Build a DISCONNECT frame asking the broker for `receipt`.
    pub fn disconnect(receipt: impl Into<String>) -> Self {
        Self::new(Command::Disconnect).header(HeaderName::Receipt, receipt)
    }

    /// Add a header (builder style). Existing headers with the same name are
    /// kept.
    pub fn header(mut self, name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// Set the frame body (builder style). An empty body clears it.
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    /// Value of the first header called `name`, if any.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key() == name)
            .map(|h| h.value.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.get_header("destination")
    }

    /// The `message` header, used by brokers to summarise ERROR frames.
    pub fn message(&self) -> Option<&str> {
        self.get_header("message")
    }

    pub fn receipt(&self) -> Option<&str> {
        self.get_header("receipt")
    }

    pub fn heart_beat(&self) -> Option<&str> {
        self.get_header("heart-beat")
    }

    /// Body as UTF-8 text, when present and valid.
    pub fn body_str(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| str::from_utf8(b).ok())
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command == Command::Heartbeat
    }

    /// Serialize the frame into its wire form.
    ///
    /// Produces `COMMAND LF (KEY ":" VALUE LF)* LF [BODY] NUL`, or a single
    /// LF for a heartbeat.
    pub fn serialize(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.write_into(&mut dst);
        dst.to_vec()
    }

    pub(crate) fn write_into(&self, dst: &mut BytesMut) {
        if self.is_heartbeat() {
            dst.put_u8(b'\n');
            return;
        }

        dst.extend_from_slice(self.command.as_str().as_bytes());
        dst.put_u8(b'\n');

        let escape = self.command.escapes_headers();
        for header in &self.headers {
            put_header_text(dst, header.key(), escape);
            dst.put_u8(b':');
            put_header_text(dst, &header.value, escape);
            dst.put_u8(b'\n');
        }

        let body = self.body.as_deref().unwrap_or_default();
        // a NUL inside the body would end the frame early without a length
        if body.contains(&0) && self.get_header("content-length").is_none() {
            dst.extend_from_slice(b"content-length:");
            dst.extend_from_slice(body.len().to_string().as_bytes());
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(body);
        dst.put_u8(0);
    }

    /// Parse one frame from its wire form.
    ///
    /// A single trailing NUL is stripped before parsing. A lone LF parses as
    /// a heartbeat. Header lines without a colon are skipped.
    pub fn parse(input: &[u8]) -> Result<Frame, FrameError> {
        if input.is_empty() {
            return Err(FrameError::Empty);
        }
        let input = input.strip_suffix(&[0u8]).unwrap_or(input);
        Self::from_slice(input)
    }

    /// Parse a frame slice that has already had its NUL terminator removed.
    pub(crate) fn from_slice(input: &[u8]) -> Result<Frame, FrameError> {
        if input.is_empty() {
            return Err(FrameError::Empty);
        }
        if input == b"\n" || input == b"\r\n" {
            return Ok(Frame::heartbeat());
        }

        let (command_line, mut rest) = split_line(input);
        let token = str::from_utf8(command_line).map_err(|_| FrameError::InvalidUtf8("command"))?;
        let command: Command = token.parse()?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::new();
        let mut body: &[u8] = &[];
        while !rest.is_empty() {
            let (line, tail) = split_line(rest);
            rest = tail;
            if line.is_empty() {
                body = rest;
                break;
            }
            // split at the first colon only: values may contain colons
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                debug!(
                    line = %String::from_utf8_lossy(line),
                    "skipping header line without a colon"
                );
                continue;
            };
            let name = header_text(&line[..colon], escaped, "header name")?;
            let value = header_text(&line[colon + 1..], escaped, "header value")?;
            headers.push(Header::new(name, value));
        }

        Ok(Frame {
            command,
            headers,
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_vec())
            },
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for h in &self.headers {
            writeln!(f, "{}: {}", h.name, h.value)?;
        }
        writeln!(
            f,
            "Body ({} bytes)",
            self.body.as_ref().map_or(0, Vec::len)
        )
    }
}

/// Split `input` at the first LF, dropping a trailing CR from the line.
fn split_line(input: &[u8]) -> (&[u8], &[u8]) {
    let (line, rest) = match input.iter().position(|&b| b == b'\n') {
        Some(end) => (&input[..end], &input[end + 1..]),
        None => (input, &[][..]),
    };
    (line.strip_suffix(b"\r").unwrap_or(line), rest)
}

/// Append header text, escaping it per STOMP 1.2 when `escape` is set.
fn put_header_text(dst: &mut BytesMut, text: &str, escape: bool) {
    if !escape {
        dst.extend_from_slice(text.as_bytes());
        return;
    }
    for &b in text.as_bytes() {
        match b {
            b'\\' => dst.extend_from_slice(b"\\\\"),
            b'\r' => dst.extend_from_slice(b"\\r"),
            b'\n' => dst.extend_from_slice(b"\\n"),
            b':' => dst.extend_from_slice(b"\\c"),
            _ => dst.put_u8(b),
        }
    }
}

/// Decode header text, undoing STOMP 1.2 escapes when `escaped` is set.
fn header_text(raw: &[u8], escaped: bool, what: &'static str) -> Result<String, FrameError> {
    if !escaped || !raw.contains(&b'\\') {
        return str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| FrameError::InvalidUtf8(what));
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(&other) => {
                return Err(FrameError::InvalidEscape(format!("\\{}", other as char)));
            }
            None => return Err(FrameError::InvalidEscape("trailing backslash".to_string())),
        }
    }
    String::from_utf8(out).map_err(|_| FrameError::InvalidUtf8(what))
}
