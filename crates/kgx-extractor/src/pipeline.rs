//! Per-file extraction pipeline

use crate::artifacts::ArtifactPaths;
use crate::chunking::Chunker;
use crate::config::ExtractorConfig;
use crate::error::ExtractorError;
use crate::parser::parse_reply;
use kgx_domain::traits::CompletionProvider;
use kgx_domain::{Provenance, TripletRecord};
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Outcome of a successfully extracted file
#[derive(Debug, Clone)]
pub struct FileExtraction {
    /// Number of chunks the document was split into
    pub chunk_count: usize,
    /// Records with provenance attached, in chunk order
    pub records: Vec<TripletRecord>,
    /// Where the artifacts were written
    pub artifacts: ArtifactPaths,
}

impl FileExtraction {
    /// Number of extracted records
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// Reads, chunks, completes, parses and persists one file at a time
///
/// Chunks are sent to the provider sequentially. A failed or timed-out
/// completion call aborts the current file; parse failures never do.
pub struct FilePipeline<P> {
    provider: Arc<P>,
    chunker: Chunker,
    completion_timeout: Duration,
}

impl<P> FilePipeline<P>
where
    P: CompletionProvider + Send + Sync + 'static,
    P::Error: Display,
{
    /// Create a pipeline for `provider`
    pub fn new(provider: P, config: &ExtractorConfig) -> Result<Self, ExtractorError> {
        config.validate()?;
        Ok(Self {
            provider: Arc::new(provider),
            chunker: Chunker::from_config(config)?,
            completion_timeout: config.completion_timeout(),
        })
    }

    /// Chunker in use
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Extract records from the text file at `path`
    ///
    /// Artifacts land under `out_dir` named after the file stem. An empty
    /// document is a success with no chunks and no records.
    pub async fn extract_file(
        &self,
        path: &Path,
        prompt: &str,
        out_dir: &Path,
    ) -> Result<FileExtraction, ExtractorError> {
        let text = read_text(path).await?;
        let chunks = self.chunker.chunk(&text);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        info!(
            "Extracting '{}': {} chars, {} chunks",
            stem,
            text.chars().count(),
            chunks.len()
        );

        let prompt: Arc<str> = Arc::from(prompt);
        let mut replies = Vec::with_capacity(chunks.len());
        let mut records = Vec::new();

        for chunk in &chunks {
            debug!(
                "Chunk {}/{} of '{}', {} chars",
                chunk.index + 1,
                chunks.len(),
                stem,
                chunk.char_len()
            );

            let reply = self
                .complete(Arc::clone(&prompt), chunk.text.trim().to_string(), chunk.index)
                .await?;

            let parsed = parse_reply(&reply);
            debug!("Chunk {} yielded {} records", chunk.index, parsed.len());
            records.extend(
                parsed
                    .into_iter()
                    .map(|record| record.with_provenance(Provenance::resolve(chunk.index, &chunks))),
            );
            replies.push(reply);
        }

        let artifacts = ArtifactPaths::for_stem(out_dir, &stem);
        artifacts.write(&replies, &records, &chunks).await?;

        info!("Extracted {} records from '{}'", records.len(), stem);

        Ok(FileExtraction {
            chunk_count: chunks.len(),
            records,
            artifacts,
        })
    }

    /// One completion call on the blocking pool, bounded by the timeout
    async fn complete(
        &self,
        prompt: Arc<str>,
        text: String,
        chunk_index: usize,
    ) -> Result<String, ExtractorError> {
        let provider = Arc::clone(&self.provider);

        // The blocking call itself keeps running after a timeout; only the
        // result is abandoned.
        let call = tokio::task::spawn_blocking(move || {
            provider.complete(&prompt, &text).map_err(|e| e.to_string())
        });

        match timeout(self.completion_timeout, call).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(message))) => {
                warn!("Completion failed on chunk {}: {}", chunk_index, message);
                Err(ExtractorError::Completion {
                    chunk_index,
                    message,
                })
            }
            Ok(Err(join_error)) => Err(ExtractorError::Internal(format!(
                "Completion task join error: {}",
                join_error
            ))),
            Err(_) => {
                warn!("Completion timed out on chunk {}", chunk_index);
                Err(ExtractorError::Timeout {
                    chunk_index,
                    timeout_secs: self.completion_timeout.as_secs(),
                })
            }
        }
    }
}

/// Read a text file as UTF-8, decoding lossily when it is not valid UTF-8
pub async fn read_text(path: &Path) -> Result<String, ExtractorError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractorError::FileAcquisition {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("{} is not valid UTF-8, decoding lossily", path.display());
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    Ok(text.trim().to_string())
}
