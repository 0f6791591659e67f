//! kgx Extractor
//!
//! Turns text files into triplet records: chunk the document, send each
//! chunk to a completion provider, parse the replies and write artifacts.
//!
//! # Architecture
//!
//! ```text
//! file → read_text → Chunker → CompletionProvider (per chunk) → parse_reply
//!      → records + Provenance → artifacts (txt / jsonl / chunks)
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use kgx_extractor::{ExtractorConfig, FilePipeline};
//! use kgx_llm::MockProvider;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = MockProvider::new("```json\n[]\n```");
//! let pipeline = FilePipeline::new(provider, &ExtractorConfig::default())?;
//!
//! let outcome = pipeline
//!     .extract_file(Path::new("input/report.txt"), "Extract triples.", Path::new("output/task"))
//!     .await?;
//!
//! println!("{} records from {} chunks", outcome.record_count(), outcome.chunk_count);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod artifacts;
mod chunking;
mod config;
mod error;
mod parser;
mod pipeline;

pub use artifacts::{render_chunk_listing, ArtifactPaths, CHUNKS_KEY, RAW_KEY, RECORDS_KEY};
pub use chunking::{normalize, Chunker};
pub use config::ExtractorConfig;
pub use error::ExtractorError;
pub use parser::parse_reply;
pub use pipeline::{read_text, FileExtraction, FilePipeline};
