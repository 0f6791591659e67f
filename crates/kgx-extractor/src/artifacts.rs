//! Per-file output artifacts
//!
//! ```text
//! <out_dir>/txt/<stem>_extractions.txt     raw replies, blank-line separated
//! <out_dir>/jsonl/<stem>_extractions.jsonl enriched records (pretty JSON array)
//! <out_dir>/txt/<stem>_chunks.txt          chunk listing with length headers
//! ```

use crate::error::ExtractorError;
use kgx_domain::{Chunk, TripletRecord};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Artifact kind key for raw replies
pub const RAW_KEY: &str = "txt";
/// Artifact kind key for enriched records
pub const RECORDS_KEY: &str = "jsonl";
/// Artifact kind key for the chunk listing
pub const CHUNKS_KEY: &str = "chunks";

/// Locations of one file's artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Raw reply text
    pub raw: PathBuf,
    /// Enriched record array
    pub records: PathBuf,
    /// Chunk listing
    pub chunks: PathBuf,
}

impl ArtifactPaths {
    /// Artifact locations for an input file stem under `out_dir`
    pub fn for_stem(out_dir: &Path, stem: &str) -> Self {
        Self {
            raw: out_dir.join("txt").join(format!("{}_extractions.txt", stem)),
            records: out_dir.join("jsonl").join(format!("{}_extractions.jsonl", stem)),
            chunks: out_dir.join("txt").join(format!("{}_chunks.txt", stem)),
        }
    }

    /// Artifact kind → location, absolute where the path can be resolved
    pub fn to_map(&self) -> BTreeMap<String, String> {
        [
            (RAW_KEY, &self.raw),
            (RECORDS_KEY, &self.records),
            (CHUNKS_KEY, &self.chunks),
        ]
        .into_iter()
        .map(|(key, path)| {
            let shown = std::path::absolute(path).unwrap_or_else(|_| path.clone());
            (key.to_string(), shown.display().to_string())
        })
        .collect()
    }

    /// Write all three artifacts, creating directories as needed
    pub async fn write(
        &self,
        replies: &[String],
        records: &[TripletRecord],
        chunks: &[Chunk],
    ) -> Result<(), ExtractorError> {
        write_file(&self.raw, replies.join("\n\n")).await?;
        write_file(&self.records, serde_json::to_string_pretty(records)?).await?;
        write_file(&self.chunks, render_chunk_listing(chunks)).await
    }
}

/// Human-readable chunk listing
///
/// Chunks are listed by their provenance index, so headers line up with
/// `_chunk_index` in the record artifact.
pub fn render_chunk_listing(chunks: &[Chunk]) -> String {
    let mut lines = Vec::with_capacity(chunks.len() * 4);
    for chunk in chunks {
        lines.push(format!("=== Chunk {} ===", chunk.index));
        lines.push(format!("Length: {} chars", chunk.char_len()));
        lines.push(format!("Content:\n{}", chunk.text));
        lines.push(String::new());
    }
    lines.join("\n")
}

async fn write_file(path: &Path, contents: String) -> Result<(), ExtractorError> {
    let artifact_error = |e: std::io::Error| ExtractorError::Artifact {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(artifact_error)?;
    }
    tokio::fs::write(path, contents).await.map_err(artifact_error)
}
