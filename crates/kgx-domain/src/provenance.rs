//! Provenance linking records back to the chunk they were extracted from

use crate::Chunk;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::borrow::Cow;

/// Where a record came from
///
/// A record tagged with an index that does not exist in its file's chunk
/// sequence keeps the index and renders a placeholder instead of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// The record came from a known chunk
    Chunk {
        /// Index of the chunk within its document
        index: usize,
        /// The chunk's text
        source_text: String,
    },

    /// The record referenced a chunk index outside the document's chunks
    OutOfRange {
        /// The index that was referenced
        index: usize,
        /// How many chunks the document actually has
        chunk_count: usize,
    },
}

impl Provenance {
    /// Resolve a chunk index against a document's chunk sequence
    ///
    /// # Examples
    ///
    /// ```
    /// use kgx_domain::{Chunk, Provenance};
    ///
    /// let chunks = vec![Chunk::new(0, "Alice works at Acme.".to_string(), 0, 20)];
    /// assert!(matches!(Provenance::resolve(0, &chunks), Provenance::Chunk { .. }));
    /// assert!(matches!(Provenance::resolve(3, &chunks), Provenance::OutOfRange { .. }));
    /// ```
    pub fn resolve(index: usize, chunks: &[Chunk]) -> Self {
        match chunks.get(index) {
            Some(chunk) => Provenance::Chunk {
                index,
                source_text: chunk.text.clone(),
            },
            None => Provenance::OutOfRange {
                index,
                chunk_count: chunks.len(),
            },
        }
    }

    /// The referenced chunk index
    pub fn chunk_index(&self) -> usize {
        match self {
            Provenance::Chunk { index, .. } | Provenance::OutOfRange { index, .. } => *index,
        }
    }

    /// Source text, or a placeholder naming the bad index
    pub fn source_text(&self) -> Cow<'_, str> {
        match self {
            Provenance::Chunk { source_text, .. } => Cow::Borrowed(source_text.as_str()),
            Provenance::OutOfRange { index, chunk_count } => Cow::Owned(format!(
                "[index {} out of range, {} chunks]",
                index, chunk_count
            )),
        }
    }

    /// Whether the index resolved to a real chunk
    pub fn is_resolved(&self) -> bool {
        matches!(self, Provenance::Chunk { .. })
    }
}

// Serialized as the two underscore-prefixed keys the record artifact uses,
// so it can be flattened into a record object.
impl Serialize for Provenance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("_chunk_index", &self.chunk_index())?;
        map.serialize_entry("_source_text", self.source_text().as_ref())?;
        map.end()
    }
}
