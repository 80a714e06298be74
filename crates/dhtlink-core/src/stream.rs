//! Resumable packet decoding over a byte stream.
//!
//! Socket reads do not respect packet boundaries. `StreamDecoder` keeps the
//! unconsumed tail of previous reads and hands out complete packets as
//! they become available.

use bytes::{Buf, BytesMut};

use crate::error::Result;
use crate::packet::{decode_packet, Packet};

const DEFAULT_CAPACITY: usize = 4096;

/// Buffers inbound bytes and yields complete packets.
#[derive(Debug)]
pub struct StreamDecoder {
    buf: BytesMut,
    max_packet_size: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl StreamDecoder {
    /// Create a decoder. `max_packet_size` of 0 disables the size check.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(DEFAULT_CAPACITY),
            max_packet_size,
        }
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete packet, if one is buffered.
    ///
    /// `Ok(None)` means more bytes are needed. After an `Err` the buffer is
    /// in an undefined position and the connection should be dropped.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        match decode_packet(&self.buf, self.max_packet_size)? {
            Some((packet, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    /// Lazily iterate over every complete packet currently buffered.
    ///
    /// The iterator ends when only an incomplete tail remains, and yields
    /// at most one error.
    pub fn packets(&mut self) -> Packets<'_> {
        Packets {
            decoder: self,
            failed: false,
        }
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered bytes (used when the connection is replaced).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Iterator returned by [`StreamDecoder::packets`].
pub struct Packets<'a> {
    decoder: &'a mut StreamDecoder,
    failed: bool,
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.decoder.next_packet() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
