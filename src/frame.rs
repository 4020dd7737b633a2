//! Length-prefixed framing over a byte stream.
//!
//! Outbound: prepends a 4-byte little-endian length header (not counting
//! its own 4 bytes) to each packet. Inbound: accumulates bytes until the
//! declared length is available and emits the exact payload.
//!
//! Framing maintains back-pressure through three watermarks on the
//! decode-side accumulation buffer: `low`, `high`, and `max`. [`FrameCodec`]
//! itself only tracks whether the buffer is above `high` (via
//! [`FrameCodec::is_paused`]) — the connection manager is responsible for
//! pausing its reads from the socket while paused, and resuming once the
//! buffer drains back to `low`. Exceeding `max` is a hard error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

/// Length of the little-endian length prefix, in bytes.
const LENGTH_PREFIX_LEN: usize = 4;

/// Frames declaring a length larger than this are rejected outright,
/// regardless of backpressure configuration.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Default backpressure watermarks, in bytes of buffered-but-undelivered
/// data on the decode side.
pub const DEFAULT_LOW_WATERMARK: usize = 64 * 1024;
pub const DEFAULT_HIGH_WATERMARK: usize = 1024 * 1024;
pub const DEFAULT_MAX_WATERMARK: usize = 16 * 1024 * 1024;

/// A duplex transformer between a raw byte stream and discrete packet
/// buffers, used as the `Codec` of a `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    low_watermark: usize,
    high_watermark: usize,
    max_watermark: usize,
    paused: bool,
}

impl FrameCodec {
    pub fn new(low_watermark: usize, high_watermark: usize, max_watermark: usize) -> Self {
        Self { low_watermark, high_watermark, max_watermark, paused: false }
    }

    /// Whether the last decode left the buffer at or above the high
    /// watermark. The connection manager should stop polling the socket
    /// for more bytes while this is true.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn update_pause_state(&mut self, buffered: usize) {
        if !self.paused && buffered >= self.high_watermark {
            self.paused = true;
        } else if self.paused && buffered <= self.low_watermark {
            self.paused = false;
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_WATERMARK, DEFAULT_HIGH_WATERMARK, DEFAULT_MAX_WATERMARK)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() >= self.max_watermark {
            return Err(FrameError::BackpressureExceeded { buffered: src.len(), max: self.max_watermark });
        }

        if src.len() < LENGTH_PREFIX_LEN {
            self.update_pause_state(src.len());
            return Ok(None);
        }

        let declared_len = u32::from_le_bytes(src[..LENGTH_PREFIX_LEN].try_into().unwrap());
        if declared_len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(declared_len));
        }

        let total_len = LENGTH_PREFIX_LEN + declared_len as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            self.update_pause_state(src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let packet = src.split_to(declared_len as usize).freeze();
        self.update_pause_state(src.len());
        Ok(Some(packet))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() as u64 > MAX_FRAME_SIZE as u64 {
            return Err(FrameError::TooLarge(item.len() as u32));
        }
        dst.reserve(LENGTH_PREFIX_LEN + item.len());
        dst.put_u32_le(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}
