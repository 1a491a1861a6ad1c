//! Ordered chunk storage shared by readable and writable channels.

use std::{collections::VecDeque, fmt};

use crate::chunk::{units, Chunk};

/// A FIFO queue of pending chunks with a running accounting length.
///
/// Each chunk may carry metadata `M`, which writable channels use for the
/// per-chunk completion callback.
/// The accounting length always equals the sum of the unit sizes of the queued chunks.
pub struct ChunkBuffer<T, M = ()> {
    entries: VecDeque<(T, M)>,
    length: usize,
    object_mode: bool,
}

impl<T, M> fmt::Debug for ChunkBuffer<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("chunks", &self.entries.len())
            .field("length", &self.length)
            .field("object_mode", &self.object_mode)
            .finish()
    }
}

impl<T: Chunk, M> ChunkBuffer<T, M> {
    /// Creates an empty buffer.
    pub fn new(object_mode: bool) -> Self {
        Self { entries: VecDeque::new(), length: 0, object_mode }
    }

    /// Accounting length of all queued chunks.
    pub fn len(&self) -> usize {
        self.length
    }

    /// True, if no chunks are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued chunks.
    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether every chunk counts as one unit.
    pub fn is_object_mode(&self) -> bool {
        self.object_mode
    }

    /// Accounting size of a chunk in this buffer.
    pub fn units_of(&self, chunk: &T) -> usize {
        units(chunk, self.object_mode)
    }

    /// Enqueues a chunk with metadata at the back.
    pub fn push_back_with(&mut self, chunk: T, meta: M) {
        self.length += self.units_of(&chunk);
        self.entries.push_back((chunk, meta));
    }

    /// Enqueues a chunk with metadata at the front.
    pub fn push_front_with(&mut self, chunk: T, meta: M) {
        self.length += self.units_of(&chunk);
        self.entries.push_front((chunk, meta));
    }

    /// Dequeues the front chunk and its metadata.
    pub fn pop_front_with(&mut self) -> Option<(T, M)> {
        let (chunk, meta) = self.entries.pop_front()?;
        self.length -= self.units_of(&chunk);
        Some((chunk, meta))
    }

    /// The front chunk.
    pub fn front(&self) -> Option<&T> {
        self.entries.front().map(|(chunk, _)| chunk)
    }

    /// Iterates over the queued chunks in order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(chunk, _)| chunk)
    }

    /// Removes all chunks, returning them in order.
    pub fn drain_all(&mut self) -> Vec<(T, M)> {
        self.length = 0;
        self.entries.drain(..).collect()
    }
}

impl<T: Chunk> ChunkBuffer<T> {
    /// Enqueues a chunk at the back.
    pub fn push_back(&mut self, chunk: T) {
        self.push_back_with(chunk, ())
    }

    /// Enqueues a chunk at the front.
    pub fn push_front(&mut self, chunk: T) {
        self.push_front_with(chunk, ())
    }

    /// Dequeues the front chunk.
    pub fn pop_front(&mut self) -> Option<T> {
        self.pop_front_with().map(|(chunk, ())| chunk)
    }

    /// Dequeues exactly `n` units.
    ///
    /// In object mode this dequeues the front chunk.
    /// In sized mode chunks are split or joined as needed; if fewer than `n`
    /// units are buffered, everything is returned.
    pub fn take(&mut self, n: usize) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        if self.object_mode {
            return self.pop_front();
        }

        if n >= self.length {
            return self.take_all();
        }

        let front = self.entries.front_mut()?;
        let front_len = front.0.size();
        if n < front_len {
            self.length -= n;
            return Some(front.0.split_to(n));
        }
        if n == front_len {
            return self.pop_front();
        }

        let mut parts = Vec::new();
        let mut missing = n;
        while missing > 0 {
            let Some((chunk, ())) = self.entries.front_mut() else { break };
            let len = chunk.size();
            if len <= missing {
                missing -= len;
                self.length -= len;
                if let Some((chunk, ())) = self.entries.pop_front() {
                    parts.push(chunk);
                }
            } else {
                self.length -= missing;
                parts.push(chunk.split_to(missing));
                missing = 0;
            }
        }
        Some(join(parts))
    }

    /// Dequeues all buffered chunks.
    ///
    /// In sized mode they are joined into one chunk.
    /// In object mode only the front chunk is returned.
    pub fn take_all(&mut self) -> Option<T> {
        if self.object_mode || self.entries.len() <= 1 {
            return self.pop_front();
        }

        let parts = self.drain_all().into_iter().map(|(chunk, ())| chunk).collect();
        Some(join(parts))
    }
}

fn join<T: Chunk>(mut parts: Vec<T>) -> T {
    if parts.len() == 1 {
        if let Some(part) = parts.pop() {
            return part;
        }
    }
    T::concat(parts)
}
