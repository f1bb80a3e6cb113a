//! Wire framing for the heartbeat stream.
//!
//! Every message on the wire is `[u32 big-endian length][payload]`. A single
//! socket read may hold several frames, a partial frame, or both, so decoding
//! works on an accumulating `BytesMut` owned by the caller: complete frames are
//! split off the front, the incomplete tail stays in place for the next read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub mod report;

/// Length prefix size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Largest payload accepted by default (100 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },
}

/// Stateless frame encoder/decoder. The only thing it carries is the size
/// limit; reassembly state lives in the buffer handed to [`FrameCodec::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// The limit is capped at `u32::MAX`, the largest length the header can carry.
    pub fn new(max_frame_size: usize) -> Self {
        let max_frame_size = max_frame_size.min(u32::MAX as usize);
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Upper bound of what a caller's reassembly buffer can hold between
    /// reads: one header plus one maximal payload.
    pub fn remainder_bound(&self) -> usize {
        HEADER_SIZE + self.max_frame_size
    }

    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, FrameError> {
        let mut dst = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        self.encode_into(payload, &mut dst)?;
        Ok(dst.freeze())
    }

    pub fn encode_into(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        self.check_len(payload.len())?;
        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }

    /// Split every complete frame off the front of `buffer`.
    ///
    /// Payloads come back in arrival order. Whatever is left in `buffer`
    /// afterwards is the start of a frame that has not fully arrived yet and
    /// must be kept for the next call. A header announcing more than the
    /// configured maximum is an error, so the leftover never grows past
    /// [`FrameCodec::remainder_bound`]. Frames completed ahead of such a
    /// header are still returned; the bad header stays at the front and fails
    /// the next call.
    pub fn decode(&self, buffer: &mut BytesMut) -> Result<Vec<Bytes>, FrameError> {
        let mut payloads = Vec::new();
        loop {
            match self.next_frame(buffer) {
                Ok(Some(payload)) => payloads.push(payload),
                Ok(None) => return Ok(payloads),
                Err(e) if payloads.is_empty() => return Err(e),
                Err(_) => return Ok(payloads),
            }
        }
    }

    /// Split one complete frame off the front of `buffer`, if there is one.
    /// Nothing is consumed when the frame is incomplete or its header is bad.
    pub fn next_frame(&self, buffer: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        // peek, the header is only consumed together with its payload
        let mut header = &buffer[..HEADER_SIZE];
        let len = header.get_u32() as usize;
        self.check_len(len)?;

        if buffer.len() < HEADER_SIZE + len {
            return Ok(None);
        }

        buffer.advance(HEADER_SIZE);
        Ok(Some(buffer.split_to(len).freeze()))
    }

    fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge { len, max: self.max_frame_size });
        }
        Ok(())
    }
}
