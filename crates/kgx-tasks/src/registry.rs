//! Task registry
//!
//! The registry owns every [`Task`]. Workers and callers only reach task
//! state through its methods, each of which holds the map lock for a single
//! read or read-modify-write of one entry. Every mutation bumps the task's
//! revision and broadcasts the new snapshot while the lock is still held, so
//! listeners observe snapshots of one task in revision order.

use crate::error::TaskError;
use crate::types::{
    format_duration, FileStatus, Task, TaskErrorEntry, TaskFile, TaskPage, TaskStatus,
    SYSTEM_ERROR_FILE,
};
use chrono::{DateTime, Utc};
use kgx_domain::TaskId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 1024;

struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
}

/// Counts of tasks by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Waiting for a worker
    pub pending: usize,
    /// Being processed
    pub processing: usize,
    /// Completed
    pub completed: usize,
    /// Failed
    pub failed: usize,
    /// Cancelled
    pub cancelled: usize,
}

impl StatusCounts {
    /// All tasks counted
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// Owner of all task state
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    events: broadcast::Sender<Task>,
    output_root: PathBuf,
}

impl TaskRegistry {
    /// Create an empty registry writing artifacts under `output_root`
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tasks: Mutex::new(HashMap::new()),
            events,
            output_root: output_root.into(),
        }
    }

    /// Receive a snapshot after every mutation of any task
    pub fn subscribe_events(&self) -> broadcast::Receiver<Task> {
        self.events.subscribe()
    }

    /// Artifact directory of a task
    pub fn task_dir(&self, task_id: TaskId) -> PathBuf {
        self.output_root.join(task_id.to_string())
    }

    /// Root directory for all task artifacts
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            error!("Task map mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Bump revision and timestamp, then broadcast. Caller holds the lock.
    fn publish(&self, task: &mut Task) {
        task.revision += 1;
        task.updated_at = Utc::now();
        // No receivers is fine
        let _ = self.events.send(task.clone());
    }

    /// Register a new pending task
    ///
    /// Returns the id and the token the worker checks between files.
    pub fn create(&self, total_files: usize) -> (TaskId, CancellationToken) {
        let task_id = TaskId::new();
        let cancel = CancellationToken::new();
        let mut task = Task::new(task_id, total_files, Utc::now());

        let mut tasks = self.lock();
        self.publish(&mut task);
        tasks.insert(
            task_id,
            TaskEntry {
                task,
                cancel: cancel.clone(),
            },
        );
        drop(tasks);

        info!("Created task {} with {} files", task_id, total_files);
        (task_id, cancel)
    }

    /// Snapshot of a task
    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.lock().get(&task_id).map(|entry| entry.task.clone())
    }

    /// Whether the task is still registered
    pub fn contains(&self, task_id: TaskId) -> bool {
        self.lock().contains_key(&task_id)
    }

    /// Page through tasks, newest first, optionally filtered by status
    pub fn list(&self, status: Option<TaskStatus>, limit: usize, offset: usize) -> TaskPage {
        let mut matching: Vec<Task> = self
            .lock()
            .values()
            .filter(|entry| status.is_none_or(|s| entry.task.status == s))
            .map(|entry| entry.task.clone())
            .collect();

        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.task_id.cmp(&a.task_id))
        });

        let total = matching.len();
        let tasks = matching.into_iter().skip(offset).take(limit).collect();

        TaskPage {
            tasks,
            total,
            limit,
            offset,
        }
    }

    /// Count tasks by status
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.lock().values() {
            match entry.task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Request cancellation
    ///
    /// Returns `false` when the task is absent or already terminal. A pending
    /// task becomes `cancelled` at once; a processing task keeps running its
    /// current file and is marked `cancelled` by its worker afterwards.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(&task_id) else {
            return false;
        };
        if entry.task.is_terminal() {
            return false;
        }

        entry.cancel.cancel();
        if entry.task.status == TaskStatus::Pending {
            entry.task.status = TaskStatus::Cancelled;
            self.publish(&mut entry.task);
        }
        drop(tasks);

        info!("Cancellation requested for task {}", task_id);
        true
    }

    /// Request cancellation of every non-terminal task
    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.lock();
        let mut cancelled = 0;
        for entry in tasks.values_mut() {
            if entry.task.is_terminal() {
                continue;
            }
            entry.cancel.cancel();
            if entry.task.status == TaskStatus::Pending {
                entry.task.status = TaskStatus::Cancelled;
                self.publish(&mut entry.task);
            }
            cancelled += 1;
        }
        cancelled
    }

    /// Move a pending task to `processing`
    ///
    /// Returns `false` when the task is gone, cancelled or otherwise not
    /// pending; the worker then skips the job.
    pub fn mark_processing(&self, task_id: TaskId) -> bool {
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(&task_id) else {
            return false;
        };
        if entry.task.status != TaskStatus::Pending || entry.cancel.is_cancelled() {
            return false;
        }
        entry.task.status = TaskStatus::Processing;
        self.publish(&mut entry.task);
        true
    }

    /// Append the final outcome of one file
    ///
    /// Ignored, with a warning, if the task is terminal or every file has
    /// already been recorded.
    pub fn record_file(&self, task_id: TaskId, file: TaskFile, elapsed: Duration) -> bool {
        let mut tasks = self.lock();
        let Some(entry) = tasks.get_mut(&task_id) else {
            return false;
        };
        let task = &mut entry.task;
        if task.is_terminal() || task.attempted_files() >= task.total_files {
            warn!(
                "Dropping result for '{}' on task {} ({}, {}/{} files)",
                file.file_name,
                task_id,
                task.status,
                task.attempted_files(),
                task.total_files
            );
            return false;
        }

        match file.status {
            FileStatus::Success => {
                task.processed_files += 1;
                task.total_triples += file.triples_count;
            }
            _ => {
                task.failed_files += 1;
                task.errors.push(TaskErrorEntry {
                    file_name: file.file_name.clone(),
                    material_id: file.material_id.clone(),
                    error: file
                        .error
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                });
            }
        }
        task.results.push(file);
        task.processing_time = format_duration(elapsed);
        self.publish(task);
        true
    }

    /// Finish a job that attempted every file
    ///
    /// The task fails only when no file succeeded and at least one failed.
    pub fn complete(&self, task_id: TaskId, elapsed: Duration) -> Option<TaskStatus> {
        self.finish(task_id, elapsed, |task| {
            if task.processed_files == 0 && task.failed_files > 0 {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            }
        })
    }

    /// Finish a job that stopped at a file boundary after cancellation
    pub fn mark_cancelled(&self, task_id: TaskId, elapsed: Duration) -> Option<TaskStatus> {
        self.finish(task_id, elapsed, |_| TaskStatus::Cancelled)
    }

    /// Record a job-level fault and fail the task
    pub fn fail_system(
        &self,
        task_id: TaskId,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Option<TaskStatus> {
        let message = message.into();
        error!("Task {} failed: {}", task_id, message);
        self.finish(task_id, elapsed, move |task| {
            task.errors.push(TaskErrorEntry {
                file_name: SYSTEM_ERROR_FILE.to_string(),
                material_id: None,
                error: message,
            });
            TaskStatus::Failed
        })
    }

    /// Apply a terminal transition unless the task is already terminal
    fn finish(
        &self,
        task_id: TaskId,
        elapsed: Duration,
        decide: impl FnOnce(&mut Task) -> TaskStatus,
    ) -> Option<TaskStatus> {
        let mut tasks = self.lock();
        let entry = tasks.get_mut(&task_id)?;
        if entry.task.is_terminal() {
            debug!(
                "Task {} already {}, keeping status",
                task_id, entry.task.status
            );
            return Some(entry.task.status);
        }

        let status = decide(&mut entry.task);
        entry.task.status = status;
        entry.task.processing_time = format_duration(elapsed);
        self.publish(&mut entry.task);
        drop(tasks);

        info!(
            "Task {} {} after {}",
            task_id,
            status,
            format_duration(elapsed)
        );
        Some(status)
    }

    /// Remove terminal tasks created more than `older_than` ago
    ///
    /// Artifact directories of removed tasks are deleted as well. Returns the
    /// number of removed tasks.
    pub async fn cleanup(&self, older_than: Duration) -> Result<usize, TaskError> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| TaskError::Validation(format!("Retention out of range: {}", e)))?;
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.cleanup_before(cutoff).await)
    }

    /// Remove terminal tasks created before `cutoff`
    pub async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed: Vec<TaskId> = {
            let mut tasks = self.lock();
            let expired: Vec<TaskId> = tasks
                .values()
                .filter(|entry| entry.task.is_terminal() && entry.task.created_at < cutoff)
                .map(|entry| entry.task.task_id)
                .collect();
            for task_id in &expired {
                tasks.remove(task_id);
            }
            expired
        };

        for task_id in &removed {
            let dir = self.task_dir(*task_id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Removed artifacts at {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
            }
        }

        if !removed.is_empty() {
            info!("Cleaned up {} expired tasks", removed.len());
        }
        removed.len()
    }

    #[cfg(test)]
    pub(crate) fn set_created_at(&self, task_id: TaskId, created_at: DateTime<Utc>) {
        if let Some(entry) = self.lock().get_mut(&task_id) {
            entry.task.created_at = created_at;
        }
    }
}
