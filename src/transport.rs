use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time;
use tracing::debug;

/// A byte-stream transport the connection can dial.
///
/// `dial` yields the two halves of an established stream. The connection
/// reads chunks from `Reader` until EOF or an error (which it treats as the
/// transport closing) and writes serialized frames to `Writer`; shutting the
/// writer down and dropping both halves closes the transport.
pub trait Transport: Send + Sync + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = io::Result<(Self::Reader, Self::Writer)>> + Send;
}

/// Plain TCP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> io::Result<(Self::Reader, Self::Writer)> {
        let addr = format!("{}:{}", host, port);
        debug!(%addr, ?timeout, "dialing");
        let stream = time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", addr),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(stream.into_split())
    }
}
