use bytes::{Bytes, BytesMut};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::codec::Encoder;
use tracing::{debug, info, trace, warn};

use crate::codec::{Framer, StompCodec};
use crate::config::StompConfig;
use crate::events::{EventStream, Multicast};
use crate::frame::{Command, Frame, FrameError, HeaderName};
use crate::heartbeat::{HeartbeatScheduler, outbound_interval};
use crate::transport::{TcpTransport, Transport};

/// Capacity of the worker's inbox (API calls, transport events, ticks).
const OPS_CAPACITY: usize = 64;
/// Bytes reserved for each transport read.
const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Transport dial in flight.
    Connecting,
    /// Transport established, STOMP handshake not sent yet.
    TransportReady,
    /// CONNECT sent, waiting for CONNECTED or ERROR.
    Authenticating,
    /// CONNECTED received, heartbeats running.
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Details of an ERROR frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// The `message` header, or a placeholder when the broker omitted it.
    pub message: String,
    /// The body as text, if any.
    pub body: Option<String>,
    /// The `receipt-id` header, when the error answers a receipted frame.
    pub receipt_id: Option<String>,
    /// The complete ERROR frame.
    pub frame: Frame,
}

impl ServerError {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            message: frame
                .message()
                .unwrap_or("unknown error (no message header)")
                .to_string(),
            body: frame
                .body
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned()),
            receipt_id: frame.get_header("receipt-id").map(str::to_string),
            frame: frame.clone(),
        }
    }
}

/// Errors returned by `Connection` operations and published on its error
/// stream.
#[derive(Error, Debug, Clone)]
pub enum ConnError {
    /// An inbound frame slice could not be parsed; it was skipped.
    #[error("format error: {0}")]
    Format(#[from] FrameError),
    /// Dial, read or write failure. The connection is now disconnected.
    #[error("transport error: {0}")]
    Transport(Arc<io::Error>),
    /// The broker sent an ERROR frame. The connection stays open.
    #[error("protocol error: {}", .0.message)]
    Protocol(ServerError),
    /// The operation is not valid in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
    /// The connection worker is gone.
    #[error("connection closed")]
    Closed,
}

impl From<io::Error> for ConnError {
    fn from(err: io::Error) -> Self {
        ConnError::Transport(Arc::new(err))
    }
}

/// Generate a fresh receipt id.
fn next_receipt_id() -> String {
    static RECEIPT_COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("rcpt-{}", RECEIPT_COUNTER.fetch_add(1, Ordering::SeqCst))
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what))
}

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;
type Reply = oneshot::Sender<Result<(), ConnError>>;

/// Everything the worker reacts to, in arrival order.
enum Op {
    Connect {
        reply: Reply,
    },
    Authenticate {
        login: String,
        passcode: String,
        reply: Reply,
    },
    Send {
        frame: Frame,
        reply: Reply,
    },
    Disconnect {
        reply: Reply,
    },
    Dialed {
        session: u64,
        result: io::Result<(BoxedReader, BoxedWriter)>,
    },
    Data {
        session: u64,
        chunk: Bytes,
    },
    Closed {
        session: u64,
        error: Option<io::Error>,
    },
    Heartbeat {
        generation: u64,
    },
}

/// Event streams shared between the handles and the worker.
struct Events {
    states: Multicast<ConnectionState>,
    frames: Multicast<Frame>,
    errors: Multicast<ConnError>,
}

impl Events {
    fn new(capacity: usize) -> Self {
        Self {
            states: Multicast::new("states", capacity),
            frames: Multicast::new("frames", capacity),
            errors: Multicast::new("errors", capacity),
        }
    }

    fn close(&self) {
        self.states.close();
        self.frames.close();
        self.errors.close();
    }
}

/// Handle to a STOMP connection.
///
/// `Connection` spawns a background worker that owns the transport, the
/// framer, the heartbeat timer and the connection state. Every API call,
/// transport read and heartbeat tick is a message to that worker, so they
/// are handled strictly one at a time and frame writes never interleave.
///
/// Handles are cheap to clone. The worker stops once every handle is
/// dropped; the event streams then end.
///
/// Progress is reported asynchronously: `connect` returns once the dial has
/// started, and subscribers of [`Connection::states`] observe
/// `TransportReady` (or `Disconnected` plus an error) when it finishes.
#[derive(Clone)]
pub struct Connection {
    ops_tx: mpsc::Sender<Op>,
    state_rx: watch::Receiver<ConnectionState>,
    events: Arc<Events>,
}

impl Connection {
    /// Create a connection that dials over TCP. Must be called from within a
    /// Tokio runtime.
    pub fn new(config: StompConfig) -> Self {
        Self::with_transport(config, TcpTransport)
    }

    /// Create a connection over a custom transport. Must be called from
    /// within a Tokio runtime.
    pub fn with_transport<T: Transport>(config: StompConfig, transport: T) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(OPS_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let events = Arc::new(Events::new(config.event_capacity));

        let worker = Worker {
            transport: Arc::new(transport),
            ops_tx: ops_tx.downgrade(),
            ops_rx,
            state: ConnectionState::Disconnected,
            state_tx,
            events: events.clone(),
            codec: StompCodec::new(),
            framer: Framer::with_max_frame_size(config.max_frame_size),
            writer: None,
            reader_task: None,
            dial_task: None,
            heartbeat: None,
            session: 0,
            heartbeat_generation: 0,
            config,
        };
        tokio::spawn(worker.run());

        Self {
            ops_tx,
            state_rx,
            events,
        }
    }

    async fn request(&self, op: impl FnOnce(Reply) -> Op) -> Result<(), ConnError> {
        let (reply, rx) = oneshot::channel();
        self.ops_tx
            .send(op(reply))
            .await
            .map_err(|_| ConnError::Closed)?;
        rx.await.map_err(|_| ConnError::Closed)?
    }

    /// Start dialing the configured broker. Valid only while `Disconnected`.
    pub async fn connect(&self) -> Result<(), ConnError> {
        self.request(|reply| Op::Connect { reply }).await
    }

    /// Send the STOMP handshake. Valid only in `TransportReady`.
    ///
    /// The CONNECT frame carries `host`, `accept-version:1.2`, `login`,
    /// `passcode`, `device_id`, the configured `heart-beat` proposal and a
    /// fresh `receipt`.
    pub async fn authenticate(
        &self,
        login: impl Into<String>,
        passcode: impl Into<String>,
    ) -> Result<(), ConnError> {
        let login = login.into();
        let passcode = passcode.into();
        self.request(|reply| Op::Authenticate {
            login,
            passcode,
            reply,
        })
        .await
    }

    /// Write a frame to the broker once the transport is up.
    pub async fn send(&self, frame: Frame) -> Result<(), ConnError> {
        self.request(|reply| Op::Send { frame, reply }).await
    }

    /// Stop heartbeats, send a best-effort DISCONNECT and close the
    /// transport. Calling it while already disconnected does nothing.
    pub async fn disconnect(&self) -> Result<(), ConnError> {
        self.request(|reply| Op::Disconnect { reply }).await
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes from now on.
    pub fn states(&self) -> EventStream<ConnectionState> {
        self.events.states.subscribe()
    }

    /// Subscribe to every inbound frame, CONNECTED, ERROR and heartbeats
    /// included.
    pub fn frames(&self) -> EventStream<Frame> {
        self.events.frames.subscribe()
    }

    /// Subscribe to asynchronous errors: format errors on inbound data,
    /// transport failures and broker ERROR frames.
    pub fn errors(&self) -> EventStream<ConnError> {
        self.events.errors.subscribe()
    }
}

/// State owned by the background task.
struct Worker<T: Transport> {
    config: StompConfig,
    transport: Arc<T>,
    ops_tx: mpsc::WeakSender<Op>,
    ops_rx: mpsc::Receiver<Op>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: Arc<Events>,
    codec: StompCodec,
    framer: Framer,
    writer: Option<BoxedWriter>,
    reader_task: Option<JoinHandle<()>>,
    dial_task: Option<JoinHandle<()>>,
    heartbeat: Option<HeartbeatScheduler>,
    /// Bumped on every dial; transport events from older sessions are stale.
    session: u64,
    heartbeat_generation: u64,
}

impl<T: Transport> Worker<T> {
    async fn run(mut self) {
        while let Some(op) = self.ops_rx.recv().await {
            self.handle(op).await;
        }
        debug!("all connection handles dropped, stopping worker");
        self.disconnect().await;
        self.events.close();
    }

    async fn handle(&mut self, op: Op) {
        match op {
            Op::Connect { reply } => {
                let _ = reply.send(self.connect());
            }
            Op::Authenticate {
                login,
                passcode,
                reply,
            } => {
                let _ = reply.send(self.authenticate(login, passcode).await);
            }
            Op::Send { frame, reply } => {
                let _ = reply.send(self.send(frame).await);
            }
            Op::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(Ok(()));
            }
            Op::Dialed { session, result } => self.on_dialed(session, result),
            Op::Data { session, chunk } => {
                if session == self.session && self.writer.is_some() {
                    self.on_data(&chunk);
                }
            }
            Op::Closed { session, error } => {
                if session == self.session && self.writer.is_some() {
                    self.on_closed(error);
                }
            }
            Op::Heartbeat { generation } => self.on_heartbeat(generation).await,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        info!(from = %self.state, to = %next, "connection state changed");
        self.state = next;
        self.state_tx.send_replace(next);
        self.events.states.publish(next);
    }

    fn connect(&mut self) -> Result<(), ConnError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ConnError::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }

        self.session += 1;
        let session = self.session;
        let transport = self.transport.clone();
        let host = self.config.host.clone();
        let port = self.config.port;
        let timeout = self.config.dial_timeout;
        let ops_tx = self.ops_tx.clone();

        info!(host = %host, port, "connecting");
        self.dial_task = Some(tokio::spawn(async move {
            let result = transport
                .dial(&host, port, timeout)
                .await
                .map(|(reader, writer)| {
                    (
                        Box::new(reader) as BoxedReader,
                        Box::new(writer) as BoxedWriter,
                    )
                });
            if let Some(tx) = ops_tx.upgrade() {
                let _ = tx.send(Op::Dialed { session, result }).await;
            }
        }));
        self.transition(ConnectionState::Connecting);
        Ok(())
    }

    fn on_dialed(&mut self, session: u64, result: io::Result<(BoxedReader, BoxedWriter)>) {
        if session != self.session || self.state != ConnectionState::Connecting {
            debug!(session, "ignoring stale dial result");
            return;
        }
        self.dial_task = None;

        match result {
            Ok((reader, writer)) => {
                self.writer = Some(writer);
                self.framer = Framer::with_max_frame_size(self.config.max_frame_size);
                self.spawn_reader(session, reader);
                self.transition(ConnectionState::TransportReady);
            }
            Err(e) => {
                warn!(error = %e, "transport dial failed");
                self.events.errors.publish(ConnError::from(e));
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    fn spawn_reader(&mut self, session: u64, mut reader: BoxedReader) {
        let ops_tx = self.ops_tx.clone();
        let start_timeout = self.config.read_start_timeout;
        let stream_timeout = self.config.read_stream_timeout;

        self.reader_task = Some(tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            let mut limit = start_timeout;
            let error = loop {
                buf.reserve(READ_CHUNK);
                let read = reader.read_buf(&mut buf);
                let result = match limit {
                    Some(limit) => time::timeout(limit, read)
                        .await
                        .unwrap_or_else(|_| Err(timed_out("read"))),
                    None => read.await,
                };
                limit = stream_timeout;

                match result {
                    Ok(0) => break None,
                    Ok(n) => {
                        trace!(bytes = n, "transport read");
                        let chunk = buf.split().freeze();
                        let Some(tx) = ops_tx.upgrade() else { return };
                        if tx.send(Op::Data { session, chunk }).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => break Some(e),
                }
            };
            if let Some(tx) = ops_tx.upgrade() {
                let _ = tx.send(Op::Closed { session, error }).await;
            }
        }));
    }

    async fn authenticate(&mut self, login: String, passcode: String) -> Result<(), ConnError> {
        if self.state != ConnectionState::TransportReady {
            return Err(ConnError::InvalidState {
                operation: "authenticate",
                state: self.state,
            });
        }

        let connect = Frame::new(Command::Connect)
            .header(HeaderName::Host, self.config.host.clone())
            .header(HeaderName::AcceptVersion, "1.2")
            .header(HeaderName::Login, login)
            .header(HeaderName::Passcode, passcode)
            .header(HeaderName::DeviceId, self.config.device_id.clone())
            .header(HeaderName::HeartBeat, self.config.heartbeat.clone())
            .header(HeaderName::Receipt, next_receipt_id());
        self.write_frame(connect).await?;
        self.transition(ConnectionState::Authenticating);
        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::TransportReady
            | ConnectionState::Authenticating
            | ConnectionState::Ready => self.write_frame(frame).await,
            state => Err(ConnError::InvalidState {
                operation: "send",
                state,
            }),
        }
    }

    /// Serialize and write one frame. A failed write tears the transport
    /// down before the error is returned.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), ConnError> {
        let command = frame.command;
        match self.write_raw(frame).await {
            Ok(len) => {
                debug!(%command, bytes = len, "frame sent");
                Ok(())
            }
            Err(err @ ConnError::Transport(_)) => {
                warn!(%command, error = %err, "write failed");
                self.fail(err.clone());
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Encode `frame` and write it out under the write timeout. Returns the
    /// number of bytes written.
    async fn write_raw(&mut self, frame: Frame) -> Result<usize, ConnError> {
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;

        let Some(writer) = self.writer.as_mut() else {
            return Err(ConnError::InvalidState {
                operation: "write",
                state: self.state,
            });
        };
        let write = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        };
        match self.config.write_timeout {
            Some(limit) => time::timeout(limit, write)
                .await
                .unwrap_or_else(|_| Err(timed_out("write")))?,
            None => write.await?,
        }
        Ok(buf.len())
    }

    fn on_data(&mut self, chunk: &[u8]) {
        for item in self.framer.feed(chunk) {
            match item {
                Ok(frame) => self.on_frame(frame),
                Err(e) => {
                    warn!(error = %e, "skipping malformed inbound frame");
                    self.events.errors.publish(ConnError::Format(e));
                }
            }
        }
        trace!(buffered = self.framer.buffered(), "framer remainder");
    }

    fn on_frame(&mut self, frame: Frame) {
        debug!(command = %frame.command, "frame received");
        match frame.command {
            Command::Connected if self.state == ConnectionState::Authenticating => {
                self.start_heartbeat(frame.heart_beat());
                self.transition(ConnectionState::Ready);
            }
            Command::Connected => {
                debug!(state = %self.state, "ignoring unexpected CONNECTED");
            }
            Command::Error => {
                let server_error = ServerError::from_frame(&frame);
                warn!(message = %server_error.message, "broker sent ERROR");
                self.events.errors.publish(ConnError::Protocol(server_error));
            }
            _ => {}
        }
        self.events.frames.publish(frame);
    }

    fn start_heartbeat(&mut self, server_heartbeat: Option<&str>) {
        self.stop_heartbeat();
        let Some(interval) = server_heartbeat.and_then(outbound_interval) else {
            debug!(?server_heartbeat, "outbound heartbeats disabled");
            return;
        };
        self.heartbeat_generation += 1;
        self.heartbeat = Some(HeartbeatScheduler::start(
            interval,
            self.heartbeat_generation,
            self.ops_tx.clone(),
            |generation| Op::Heartbeat { generation },
        ));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }

    async fn on_heartbeat(&mut self, generation: u64) {
        let current = self.heartbeat.as_ref().map(HeartbeatScheduler::generation);
        if current != Some(generation) {
            trace!(generation, "discarding tick from a stopped scheduler");
            return;
        }
        // a failed write has already torn the connection down
        let _ = self.write_frame(Frame::heartbeat()).await;
    }

    fn on_closed(&mut self, error: Option<io::Error>) {
        match error {
            Some(e) => {
                warn!(error = %e, "transport failed");
                self.fail(ConnError::from(e));
            }
            None => {
                info!("transport closed by peer");
                self.release_transport();
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    /// Abandon the transport after an error and report it.
    fn fail(&mut self, err: ConnError) {
        self.release_transport();
        self.events.errors.publish(err);
        self.transition(ConnectionState::Disconnected);
    }

    /// Stop the heartbeat and drop every transport resource.
    fn release_transport(&mut self) -> Option<BoxedWriter> {
        self.stop_heartbeat();
        if let Some(task) = self.dial_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.session += 1;
        self.writer.take()
    }

    async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        self.stop_heartbeat();
        if self.writer.is_some() {
            let frame = Frame::disconnect(next_receipt_id());
            if let Err(e) = self.write_raw(frame).await {
                debug!(error = %e, "DISCONNECT not delivered");
            }
        }

        if let Some(mut writer) = self.release_transport() {
            let shutdown = writer.shutdown();
            let result = match self.config.write_timeout {
                Some(limit) => time::timeout(limit, shutdown)
                    .await
                    .unwrap_or_else(|_| Err(timed_out("shutdown"))),
                None => shutdown.await,
            };
            if let Err(e) = result {
                debug!(error = %e, "transport shutdown failed");
            }
        }
        self.transition(ConnectionState::Disconnected);
    }
}
