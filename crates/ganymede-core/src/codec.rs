//! Length-prefixed CBOR framing for the client/server wire.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use crate::error::{GResult, GanymedeError};
use std::io::Cursor;

/// Largest payload accepted in a single frame (4 MiB).
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> GResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(GanymedeError::Codec(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_LEN}",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> GResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields complete messages.
///
/// A single transport message may carry several frames, or a frame may be
/// split across messages; the decoder handles both.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes into the decoder and return one result per complete frame.
    ///
    /// A frame whose payload does not decode yields an `Err` entry; the
    /// frames around it are unaffected. The outer `Err` means the length
    /// prefix itself is unusable, and the buffer is dropped.
    pub fn feed<T: serde::de::DeserializeOwned>(
        &mut self,
        data: &[u8],
    ) -> GResult<Vec<GResult<T>>> {
        self.buffer.extend_from_slice(data);
        let mut messages = Vec::new();

        while self.buffer.len() >= 4 {
            let len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;

            if len > MAX_FRAME_LEN {
                self.buffer.clear();
                return Err(GanymedeError::Codec(format!(
                    "incoming frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
                )));
            }
            if self.buffer.len() < 4 + len {
                break;
            }

            let decoded = cbor_decode(&self.buffer[4..4 + len]);
            self.buffer.drain(..4 + len);
            messages.push(decoded);
        }

        Ok(messages)
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
