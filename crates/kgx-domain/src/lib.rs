//! kgx Domain Layer
//!
//! Value types and trait seams shared by every kgx crate. Nothing in here
//! performs I/O; infrastructure lives in `kgx-llm`, `kgx-extractor` and
//! `kgx-tasks`.
//!
//! ## Key Concepts
//!
//! - **Task**: one asynchronous extraction job over a list of input files,
//!   identified by a [`TaskId`]
//! - **Chunk**: a contiguous, size-bounded slice of a document, numbered for
//!   provenance
//! - **Triplet record**: a head–relationship–tail extraction produced from one
//!   chunk's completion reply
//! - **Provenance**: the link from a record back to the chunk it came from
//! - **Completion provider**: the "send text, receive text" collaborator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod provenance;
pub mod record;
pub mod task_id;
pub mod traits;

// Re-exports for convenience
pub use chunk::Chunk;
pub use provenance::Provenance;
pub use record::{Entity, TripletRecord};
pub use task_id::TaskId;
pub use traits::CompletionProvider;
