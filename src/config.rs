use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

/// Settings a [`Connection`](crate::Connection) is created with.
///
/// Build one with `StompConfig::default()` and the `with_*` methods:
///
/// ```
/// use stomp_stream::StompConfig;
/// use std::time::Duration;
///
/// let config = StompConfig::default()
///     .with_host("broker.local")
///     .with_port(61613)
///     .with_write_timeout(Some(Duration::from_secs(5)));
/// assert_eq!(config.address(), "broker.local:61613");
/// ```
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// Broker host name; also sent as the `host` header of the CONNECT frame.
    pub host: String,
    pub port: u16,
    /// Limit on establishing the transport.
    pub dial_timeout: Duration,
    /// Limit on each frame write. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
    /// Limit on the first read after the transport comes up.
    pub read_start_timeout: Option<Duration>,
    /// Limit on every read after the first one.
    pub read_stream_timeout: Option<Duration>,
    /// `heart-beat` proposal sent in the CONNECT frame ("cx,cy" in ms).
    pub heartbeat: String,
    /// Value of the `device_id` header sent in the CONNECT frame.
    pub device_id: String,
    /// Events buffered per subscriber before the oldest is dropped.
    pub event_capacity: usize,
    /// Largest inbound `content-length` accepted; longer frames are skipped
    /// and reported as format errors.
    pub max_frame_size: usize,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7891,
            dial_timeout: Duration::from_secs(15),
            write_timeout: None,
            read_start_timeout: Some(Duration::from_secs(10)),
            read_stream_timeout: None,
            heartbeat: "10000,10000".to_string(),
            device_id: format!("{}-{}", env!("CARGO_PKG_NAME"), std::process::id()),
            event_capacity: 64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl StompConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_read_start_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_start_timeout = timeout;
        self
    }

    pub fn with_read_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_stream_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: impl Into<String>) -> Self {
        self.heartbeat = heartbeat.into();
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// `host:port` form of the broker address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
