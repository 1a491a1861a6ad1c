//! Payload accounting.

use bytes::{Bytes, BytesMut};

use crate::{
    cfg::Encoding,
    decoder::{Decoder, TextDecoder},
};

/// A payload transported through a channel.
///
/// In sized mode the channel accounts a chunk by [size](Self::size) and may
/// split and join chunks to satisfy `read(n)` exactly.
/// In object mode every chunk counts as one unit and chunks are never split or joined,
/// so object-only payloads may implement [split_to](Self::split_to) and
/// [concat](Self::concat) trivially.
pub trait Chunk: Sized + 'static {
    /// Accounting size in sized mode, usually the byte length.
    fn size(&self) -> usize;

    /// Splits off and returns the first `at` units, leaving the remainder in `self`.
    ///
    /// Only called in sized mode with `0 < at < self.size()`.
    fn split_to(&mut self, at: usize) -> Self;

    /// Joins chunks in order into one.
    ///
    /// Only called in sized mode with at least two parts.
    fn concat(parts: Vec<Self>) -> Self;

    /// Returns a decoder for the specified text encoding, if the payload supports one.
    fn decoder(encoding: Encoding) -> Option<Box<dyn Decoder<Self>>> {
        let _ = encoding;
        None
    }
}

impl Chunk for Bytes {
    fn size(&self) -> usize {
        self.len()
    }

    fn split_to(&mut self, at: usize) -> Self {
        Bytes::split_to(self, at)
    }

    fn concat(parts: Vec<Self>) -> Self {
        let total = parts.iter().map(|part| part.len()).sum();
        let mut joined = BytesMut::with_capacity(total);
        for part in parts {
            joined.extend_from_slice(&part);
        }
        joined.freeze()
    }

    fn decoder(encoding: Encoding) -> Option<Box<dyn Decoder<Self>>> {
        Some(Box::new(TextDecoder::new(encoding)))
    }
}

impl Chunk for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn split_to(&mut self, at: usize) -> Self {
        let tail = self.split_off(at);
        std::mem::replace(self, tail)
    }

    fn concat(parts: Vec<Self>) -> Self {
        parts.concat()
    }

    fn decoder(encoding: Encoding) -> Option<Box<dyn Decoder<Self>>> {
        Some(Box::new(TextDecoder::new(encoding)))
    }
}

/// Accounting size of a chunk under the given mode.
pub(crate) fn units<T: Chunk>(chunk: &T, object_mode: bool) -> usize {
    if object_mode {
        1
    } else {
        chunk.size()
    }
}
