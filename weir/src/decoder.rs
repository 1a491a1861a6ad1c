//! Incremental text decoding of pushed chunks.

use crate::cfg::Encoding;

/// Converts chunks incrementally, possibly holding back data between calls.
pub trait Decoder<T> {
    /// Decodes a chunk.
    ///
    /// Returns [None] if all input was held back.
    fn write(&mut self, chunk: T) -> Option<T>;

    /// Flushes held back data at end of input.
    fn end(&mut self) -> Option<T>;
}

const REPLACEMENT: &str = "\u{FFFD}";

/// Decodes bytes into UTF-8 text so that chunk boundaries never split a character.
///
/// Invalid sequences are replaced by U+FFFD.
#[derive(Debug)]
pub struct TextDecoder {
    encoding: Encoding,
    pending: Vec<u8>,
}

impl TextDecoder {
    /// Creates a decoder for the specified encoding.
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding, pending: Vec::new() }
    }

    /// The encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Decodes bytes, returning the complete characters as UTF-8.
    pub fn decode(&mut self, data: &[u8]) -> Vec<u8> {
        match self.encoding {
            Encoding::Latin1 => data.iter().map(|&b| b as char).collect::<String>().into_bytes(),
            Encoding::Utf8 => {
                let mut input = std::mem::take(&mut self.pending);
                input.extend_from_slice(data);

                let mut out = Vec::with_capacity(input.len());
                let mut rest = &input[..];
                loop {
                    match std::str::from_utf8(rest) {
                        Ok(valid) => {
                            out.extend_from_slice(valid.as_bytes());
                            break;
                        }
                        Err(err) => {
                            let (valid, after) = rest.split_at(err.valid_up_to());
                            out.extend_from_slice(valid);
                            match err.error_len() {
                                Some(len) => {
                                    out.extend_from_slice(REPLACEMENT.as_bytes());
                                    rest = &after[len..];
                                }
                                None => {
                                    self.pending = after.to_vec();
                                    break;
                                }
                            }
                        }
                    }
                }
                out
            }
        }
    }

    /// Flushes an incomplete trailing sequence as U+FFFD.
    pub fn flush(&mut self) -> Vec<u8> {
        if self.pending.is_empty() {
            Vec::new()
        } else {
            self.pending.clear();
            REPLACEMENT.as_bytes().to_vec()
        }
    }
}

impl<T> Decoder<T> for TextDecoder
where
    T: AsRef<[u8]> + From<Vec<u8>>,
{
    fn write(&mut self, chunk: T) -> Option<T> {
        let out = self.decode(chunk.as_ref());
        if out.is_empty() {
            None
        } else {
            Some(out.into())
        }
    }

    fn end(&mut self) -> Option<T> {
        let out = self.flush();
        if out.is_empty() {
            None
        } else {
            Some(out.into())
        }
    }
}
