pub mod codec;
pub mod config;
pub mod connection;
pub mod events;
pub mod frame;
pub mod heartbeat;
pub mod transport;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, DecodedFrame, Framer, StompCodec};
pub use config::StompConfig;
pub use connection::{ConnError, Connection, ConnectionState, ServerError};
pub use events::{EventStream, Multicast};
pub use frame::{Command, Frame, FrameError, Header, HeaderName};
pub use heartbeat::{HeartbeatScheduler, outbound_interval, parse_heartbeat_header};
pub use transport::{TcpTransport, Transport};
