//! Error types for task orchestration

use kgx_domain::TaskId;
use thiserror::Error;

/// Errors surfaced by the task service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// The request was rejected before a task was created
    #[error("Validation error: {0}")]
    Validation(String),

    /// No task with this id
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// Unexpected fault while running a job
    #[error("System error: {0}")]
    System(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The service is shutting down and accepts no new tasks
    #[error("Service is shutting down")]
    ShuttingDown,
}
