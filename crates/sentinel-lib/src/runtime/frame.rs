//! Multiplexed log stream decoding
//!
//! When a container runs without a TTY, the runtime interleaves stdout and
//! stderr on one connection. Each frame is an 8-byte header followed by the
//! payload:
//!
//! ```text
//! [stream_type, 0, 0, 0, len_be_u32...] payload[len]
//! ```
//!
//! Chunks arrive at arbitrary boundaries, so the decoder keeps whatever
//! trailing partial frame it cannot decode yet and prepends it to the next
//! chunk.

use crate::models::LogStream;

/// Size of the frame header in bytes
pub const FRAME_HEADER_LEN: usize = 8;

/// Stream type byte for stderr; every other value is treated as stdout
const STREAM_TYPE_STDERR: u8 = 2;

/// A complete, non-empty frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub stream: LogStream,
    pub message: String,
}

/// Incremental decoder for multiplexed log frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes not yet consumed by a complete frame
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every complete frame now available
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut cursor = 0usize;

        while self.pending.len() - cursor >= FRAME_HEADER_LEN {
            let header = &self.pending[cursor..cursor + FRAME_HEADER_LEN];
            let stream_type = header[0];
            let payload_len =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

            let payload_start = cursor + FRAME_HEADER_LEN;
            let payload_end = match payload_start.checked_add(payload_len) {
                Some(end) if end <= self.pending.len() => end,
                // Incomplete payload: wait for more bytes
                _ => break,
            };

            let message = String::from_utf8_lossy(&self.pending[payload_start..payload_end])
                .trim()
                .to_string();

            if !message.is_empty() {
                frames.push(DecodedFrame {
                    stream: stream_for(stream_type),
                    message,
                });
            }

            cursor = payload_end;
        }

        self.pending.drain(..cursor);
        frames
    }

    /// Number of buffered bytes belonging to an incomplete frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any buffered partial frame
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

fn stream_for(stream_type: u8) -> LogStream {
    if stream_type == STREAM_TYPE_STDERR {
        LogStream::Stderr
    } else {
        LogStream::Stdout
    }
}

/// Encode a single frame (used by tests and mock runtimes)
pub fn encode_frame(stream_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&[stream_type, 0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
