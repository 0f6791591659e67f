//! Task state as reported to callers

use chrono::{DateTime, Utc};
use kgx_domain::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, waiting for a worker
    Pending,
    /// A worker is processing files
    Processing,
    /// All files were attempted and at least one succeeded
    Completed,
    /// No file succeeded, or the job hit a system error
    Failed,
    /// Cancelled by a caller or by shutdown
    Cancelled,
}

impl TaskStatus {
    /// Whether no further mutation will occur
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

/// Status of one file within a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Not yet started
    Pending,
    /// Being extracted
    Processing,
    /// Extracted and artifacts written
    Success,
    /// Extraction failed
    Failed,
}

/// Caller-supplied correlation id for an input file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialId {
    /// Numeric id
    Number(i64),
    /// Textual id
    Text(String),
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialId::Number(n) => write!(f, "{}", n),
            MaterialId::Text(s) => f.write_str(s),
        }
    }
}

/// Result for one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFile {
    /// File name without directories
    pub file_name: String,

    /// Correlation id from the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<MaterialId>,

    /// Outcome
    pub status: FileStatus,

    /// Records extracted from this file
    pub triples_count: usize,

    /// Artifact kind → location
    pub output_files: BTreeMap<String, String>,

    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskFile {
    /// A successfully extracted file
    pub fn success(
        file_name: impl Into<String>,
        material_id: Option<MaterialId>,
        triples_count: usize,
        output_files: BTreeMap<String, String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            material_id,
            status: FileStatus::Success,
            triples_count,
            output_files,
            error: None,
        }
    }

    /// A file whose extraction failed
    pub fn failed(
        file_name: impl Into<String>,
        material_id: Option<MaterialId>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            material_id,
            status: FileStatus::Failed,
            triples_count: 0,
            output_files: BTreeMap::new(),
            error: Some(error.into()),
        }
    }
}

/// An itemized failure on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskErrorEntry {
    /// Failing file, or `SYSTEM` for job-level faults
    pub file_name: String,

    /// Correlation id of the failing file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_id: Option<MaterialId>,

    /// Failure message
    pub error: String,
}

/// File name used for job-level error entries
pub const SYSTEM_ERROR_FILE: &str = "SYSTEM";

/// Full task state
///
/// Snapshots are cloned out of the registry; the registry is the only
/// writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    /// Task identifier
    pub task_id: TaskId,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Files in the request
    pub total_files: usize,
    /// Files extracted successfully
    pub processed_files: usize,
    /// Files that failed
    pub failed_files: usize,
    /// Records across all successful files
    pub total_triples: usize,
    /// Wall time of the job, see [`format_duration`]
    pub processing_time: String,
    /// Per-file results in input order
    pub results: Vec<TaskFile>,
    /// Itemized failures
    pub errors: Vec<TaskErrorEntry>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,

    /// Mutation counter, strictly increasing per task
    #[serde(skip)]
    pub revision: u64,
}

impl Task {
    pub(crate) fn new(task_id: TaskId, total_files: usize, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            total_files,
            processed_files: 0,
            failed_files: 0,
            total_triples: 0,
            processing_time: format_duration(Duration::ZERO),
            results: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Whether the task reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Files attempted so far
    pub fn attempted_files(&self) -> usize {
        self.processed_files + self.failed_files
    }
}

/// One page of a task listing
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    /// Tasks on this page, newest first
    pub tasks: Vec<Task>,
    /// Tasks matching the filter across all pages
    pub total: usize,
    /// Page size used
    pub limit: usize,
    /// Offset used
    pub offset: usize,
}

/// Service-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// `running` or `stopping`
    pub service_status: String,
    /// Tasks in the registry
    pub total_tasks: usize,
    /// Tasks waiting for a worker
    pub pending_tasks: usize,
    /// Tasks being processed
    pub processing_tasks: usize,
    /// Completed tasks
    pub completed_tasks: usize,
    /// Failed tasks
    pub failed_tasks: usize,
    /// Cancelled tasks
    pub cancelled_tasks: usize,
    /// Pool size
    pub max_workers: usize,
    /// Jobs currently holding a worker slot
    pub active_workers: usize,
}

/// Render a duration as `12s`, `3m5s` or `2h14m`
///
/// # Examples
///
/// ```
/// use kgx_tasks::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(12_900)), "12s");
/// assert_eq!(format_duration(Duration::from_secs(185)), "3m5s");
/// assert_eq!(format_duration(Duration::from_secs(8_040)), "2h14m");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_material_id_untagged() {
        let number: MaterialId = serde_json::from_str("42").unwrap();
        let text: MaterialId = serde_json::from_str("\"doc-7\"").unwrap();
        assert_eq!(number, MaterialId::Number(42));
        assert_eq!(text, MaterialId::Text("doc-7".to_string()));
        assert_eq!(serde_json::to_string(&number).unwrap(), "42");
    }

    #[test]
    fn test_task_serialization() {
        let now = Utc::now();
        let mut task = Task::new(TaskId::new(), 2, now);
        task.results.push(TaskFile::failed(
            "b.txt",
            Some(MaterialId::Number(2)),
            "boom",
        ));

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["total_files"], 2);
        assert_eq!(json["processing_time"], "0s");
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][0]["material_id"], 2);
        assert!(json.get("revision").is_none());
        assert!(json["task_id"].is_string());
        assert!(json["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_format_duration_boundaries() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m0s");
        assert_eq!(format_duration(Duration::from_secs(3599)), "59m59s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m");
    }
}
