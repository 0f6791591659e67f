//! Document chunks

use serde::{Deserialize, Serialize};

/// A contiguous slice of a normalized document
///
/// `start` and `end` are character offsets (not bytes) into the normalized
/// document, so `text` is exactly `document.chars().skip(start).take(end - start)`.
/// Chunks of one document are numbered from 0 and the index is the stable
/// identifier records use for provenance.
///
/// A chunk that opens a paragraph keeps the blank-line separator in front of
/// it. That whitespace is part of `text`, of the record's `_source_text` and
/// of the chunk listing, and it counts toward [`char_len`](Self::char_len).
/// Completion calls send the text trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk within its document
    pub index: usize,

    /// The chunk text
    pub text: String,

    /// First character offset covered by this chunk
    pub start: usize,

    /// One past the last character offset covered by this chunk
    pub end: usize,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(index: usize, text: String, start: usize, end: usize) -> Self {
        Self {
            index,
            text,
            start,
            end,
        }
    }

    /// Length of the chunk in characters
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }

    /// Number of characters this chunk shares with the chunk that follows it
    pub fn overlap_with(&self, next: &Chunk) -> usize {
        self.end.saturating_sub(next.start)
    }
}
