//! zlib-stream decoding
//!
//! Discord compresses the whole session as one zlib stream. Each gateway
//! message ends with a sync flush (`00 00 ff ff`); frames are buffered until
//! the suffix shows up, then inflated with the same context as every earlier
//! message.

use flate2::{Decompress, FlushDecompress, Status};

use super::CodecError;
use crate::protocol::GatewayEvent;

/// Sync flush marker closing every compressed message
pub const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Largest decoded message accepted
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024 * 1024;

const INITIAL_OUTPUT: usize = 32 * 1024;

/// Persistent inflate context for one connection
pub struct ZlibStream {
    inflater: Decompress,
    buffer: Vec<u8>,
    limit: usize,
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibStream {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(MAX_MESSAGE_SIZE)
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            inflater: Decompress::new(true),
            buffer: Vec::new(),
            limit,
        }
    }

    /// Feed one binary frame
    ///
    /// Returns the inflated message once the frame that completes it arrives,
    /// `None` while the message is still partial.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, CodecError> {
        let size = self.buffer.len() + chunk.len();
        if size > self.limit {
            self.buffer.clear();
            return Err(CodecError::TooLarge {
                size,
                limit: self.limit,
            });
        }

        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let result = self.inflate();
        self.buffer.clear();
        result.map(Some)
    }

    /// Bytes waiting for a sync flush
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn inflate(&mut self) -> Result<Vec<u8>, CodecError> {
        let input = self.buffer.as_slice();
        let mut output = Vec::with_capacity(INITIAL_OUTPUT.max(input.len() * 4));
        let mut offset = 0;

        loop {
            if output.len() == output.capacity() {
                if output.capacity() >= self.limit {
                    return Err(CodecError::TooLarge {
                        size: output.len(),
                        limit: self.limit,
                    });
                }
                output.reserve(output.capacity());
            }

            let in_before = self.inflater.total_in();
            let out_before = self.inflater.total_out();

            let status = self
                .inflater
                .decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)
                .map_err(|e| CodecError::Inflate(e.to_string()))?;

            let consumed = (self.inflater.total_in() - in_before) as usize;
            let produced = self.inflater.total_out() - out_before;
            offset += consumed;

            let input_done = offset >= input.len();
            let has_room = output.len() < output.capacity();

            match status {
                Status::StreamEnd => break,
                Status::Ok if input_done && has_room => break,
                Status::Ok => {}
                Status::BufError if consumed == 0 && produced == 0 => {
                    if input_done {
                        break;
                    }
                    if has_room {
                        return Err(CodecError::Inflate("inflate made no progress".to_string()));
                    }
                }
                Status::BufError => {}
            }
        }

        if output.len() > self.limit {
            return Err(CodecError::TooLarge {
                size: output.len(),
                limit: self.limit,
            });
        }

        Ok(output)
    }
}

/// Frame decoder for one connection
///
/// Binary frames go through the zlib stream, text frames are parsed as is.
#[derive(Default)]
pub struct FrameDecoder {
    stream: ZlibStream,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode_binary(&mut self, chunk: &[u8]) -> Result<Option<GatewayEvent>, CodecError> {
        match self.stream.push(chunk)? {
            Some(bytes) => Ok(Some(GatewayEvent::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn decode_text(&self, text: &str) -> Result<GatewayEvent, CodecError> {
        if text.len() > self.stream.limit {
            return Err(CodecError::TooLarge {
                size: text.len(),
                limit: self.stream.limit,
            });
        }
        Ok(GatewayEvent::from_slice(text.as_bytes())?)
    }
}
