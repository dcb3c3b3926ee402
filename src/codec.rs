use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::frame::{Frame, FrameError};

/// Items produced by the decoder.
///
/// A malformed frame slice is reported as `Err` for that slice only, so a
/// bad frame never ends a decoded stream.
pub type DecodedFrame = Result<Frame, FrameError>;

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into frames, treating a bare LF (or CR LF) as a
///   heartbeat.
/// - Honour a `content-length` header so bodies may contain NUL bytes;
///   otherwise a frame ends at the first NUL.
/// - Encode frames (including heartbeats) into their wire form.
///
/// A `content-length` above the codec's maximum frame size is rejected as
/// [`FrameError::ContentLength`] instead of being waited for.
pub struct StompCodec {
    // No internal buffer: frames are sliced directly out of `src`
    max_frame_size: usize,
}

/// Largest `content-length` accepted by default (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

impl StompCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec that rejects bodies longer than `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode the next item from `src`, consuming exactly the bytes that
    /// belong to it.
    ///
    /// Returns `None` when `src` does not yet hold a complete item; in that
    /// case `src` is left untouched so the next read can complete it.
    pub fn decode_item(&mut self, src: &mut BytesMut) -> Option<DecodedFrame> {
        // heartbeat: LF or CR LF before any frame content
        match src.first() {
            None => return None,
            Some(b'\n') => {
                src.advance(1);
                return Some(Ok(Frame::heartbeat()));
            }
            Some(b'\r') => match src.get(1) {
                None => return None,
                Some(b'\n') => {
                    src.advance(2);
                    return Some(Ok(Frame::heartbeat()));
                }
                Some(_) => {}
            },
            Some(_) => {}
        }

        let first_nul = src.iter().position(|&b| b == 0);
        let header_end = find_header_end(src);

        let frame_end = match (header_end, first_nul) {
            // a NUL before the blank line ends the frame regardless of headers
            (_, Some(nul)) if header_end.is_none_or(|end| nul < end) => nul,
            (None, _) => return None,
            (Some(end), first_nul) => match content_length(&src[..end]) {
                None => first_nul?,
                Some(Ok(len)) if len > self.max_frame_size => {
                    return skip_to_nul(
                        src,
                        first_nul,
                        FrameError::ContentLength(format!(
                            "{} bytes exceeds the {} byte limit",
                            len, self.max_frame_size
                        )),
                    );
                }
                Some(Ok(len)) => {
                    let Some(body_end) = end.checked_add(len) else {
                        return skip_to_nul(
                            src,
                            first_nul,
                            FrameError::ContentLength(format!("{} overflows the buffer", len)),
                        );
                    };
                    if src.len() <= body_end {
                        return None;
                    }
                    if src[body_end] == 0 {
                        body_end
                    } else {
                        return skip_to_nul(
                            src,
                            first_nul,
                            FrameError::ContentLength(format!(
                                "no NUL after {} body bytes",
                                len
                            )),
                        );
                    }
                }
                Some(Err(e)) => return skip_to_nul(src, first_nul, e),
            },
        };

        let frame_bytes = src.split_to(frame_end);
        // discard the NUL
        src.advance(1);
        trace!(len = frame_bytes.len(), "sliced frame");
        Some(Frame::from_slice(&frame_bytes))
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop everything up to and including the first NUL and report `err` for
/// that slice. Waits for more data when no NUL has arrived yet.
fn skip_to_nul(
    src: &mut BytesMut,
    first_nul: Option<usize>,
    err: FrameError,
) -> Option<DecodedFrame> {
    let nul = first_nul?;
    src.advance(nul + 1);
    Some(Err(err))
}

/// Offset of the first body byte, i.e. just past the blank line ending the
/// header block.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while let Some(rel) = buf[pos..].iter().position(|&b| b == b'\n') {
        let lf = pos + rel;
        match &buf[lf + 1..] {
            [b'\n', ..] => return Some(lf + 2),
            [b'\r', b'\n', ..] => return Some(lf + 3),
            _ => pos = lf + 1,
        }
    }
    None
}

/// Look for a `content-length` header in a complete header block.
fn content_length(block: &[u8]) -> Option<Result<usize, FrameError>> {
    block
        .split(|&b| b == b'\n')
        .skip(1)
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .find_map(|line| {
            let colon = line.iter().position(|&b| b == b':')?;
            if !line[..colon].eq_ignore_ascii_case(b"content-length") {
                return None;
            }
            let value = String::from_utf8_lossy(&line[colon + 1..]);
            Some(
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| FrameError::ContentLength(format!("{:?}: {}", value, e))),
            )
        })
}

impl Decoder for StompCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    /// Decode bytes from `src` into a frame.
    ///
    /// Never fails: malformed frames come back as `Ok(Some(Err(_)))` so the
    /// stream keeps going.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decode_item(src))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = io::Error;

    /// Encode a frame into `dst`. A heartbeat frame becomes a single LF.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.write_into(dst);
        Ok(())
    }
}

/// Incremental framer fed with raw transport reads.
///
/// Bytes that do not yet form a complete frame stay buffered until the next
/// call to [`Framer::feed`], so a read boundary may fall anywhere inside a
/// frame.
#[derive(Default)]
pub struct Framer {
    codec: StompCodec,
    buffer: BytesMut,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Framer whose codec rejects bodies longer than `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            codec: StompCodec::with_max_frame_size(max_frame_size),
            buffer: BytesMut::new(),
        }
    }

    /// Append `chunk` and return every frame completed by it, in order.
    ///
    /// A slice that fails to parse is returned as an `Err` in its position;
    /// frames after it are still decoded.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(item) = self.codec.decode_item(&mut self.buffer) {
            if let Err(e) = &item {
                debug!(error = %e, "dropping malformed frame slice");
            }
            out.push(item);
        }
        out
    }

    /// Number of bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
