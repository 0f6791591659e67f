//! kgx Tasks
//!
//! Asynchronous task orchestration for document extraction.
//!
//! # Overview
//!
//! - **Registry**: owns every task's state; all mutation goes through it
//! - **Worker pool**: at most `max_workers` jobs run at once, the rest queue
//! - **Cancellation**: cooperative, checked between files of a job
//! - **Progress notifier**: pushes a full snapshot to each subscriber after
//!   every change, with heartbeats while idle
//! - **Retention sweeper**: removes old terminal tasks and their artifacts
//!
//! # Task Lifecycle
//!
//! | Status | Entered when | Next |
//! |--------|--------------|------|
//! | `pending` | task created | `processing`, `cancelled` |
//! | `processing` | a worker slot is acquired | `completed`, `failed`, `cancelled` |
//! | `completed` | every file attempted, at least one succeeded (or none failed) | |
//! | `failed` | no file succeeded, or a system error | |
//! | `cancelled` | cancelled while pending, or at the next file boundary | |
//!
//! # Usage
//!
//! ```no_run
//! use kgx_extractor::ExtractorConfig;
//! use kgx_llm::{ChatProviderFactory, ModelConfig, ProviderKind};
//! use kgx_tasks::{ExtractionService, FileSpec, ServiceConfig, TaskRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ExtractionService::new(
//!     ServiceConfig::default(),
//!     ExtractorConfig::default(),
//!     ChatProviderFactory::default(),
//! )?;
//! service.start();
//!
//! let task_id = service.create_task(TaskRequest::new(
//!     vec![FileSpec::new("report.txt")],
//!     "Extract (head, relationship, tail) triples.",
//!     ModelConfig::for_provider(ProviderKind::DeepSeek).with_api_key("sk-..."),
//! ))?;
//!
//! let mut progress = service.subscribe(task_id);
//! while let Some(event) = progress.next().await {
//!     println!("{}", event.to_json());
//! }
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod notifier;
mod pool;
mod registry;
mod request;
mod service;
mod sweeper;
mod types;

pub use kgx_domain::TaskId;

pub use config::ServiceConfig;
pub use error::TaskError;
pub use notifier::{ProgressEvent, ProgressNotifier, Subscription};
pub use pool::WorkerPool;
pub use registry::{StatusCounts, TaskRegistry};
pub use request::{FileReference, FileSpec, ResolvedFile, TaskRequest};
pub use service::ExtractionService;
pub use sweeper::RetentionSweeper;
pub use types::{
    format_duration, FileStatus, MaterialId, ServiceStatus, Task, TaskErrorEntry, TaskFile,
    TaskPage, TaskStatus, SYSTEM_ERROR_FILE,
};
