//! Configuration for the task service
//!
//! # Examples
//!
//! ```
//! use kgx_tasks::ServiceConfig;
//!
//! let config = ServiceConfig::default();
//! assert_eq!(config.max_workers, 3);
//! assert_eq!(config.retention_days, 7);
//!
//! let config = ServiceConfig::testing();
//! assert_eq!(config.max_workers, 1);
//! assert!(config.cleanup_interval().is_none());
//! ```

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for the registry, worker pool, notifier and sweeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Jobs executing at once
    pub max_workers: usize,

    /// Root directory for task artifacts; each task gets `<output_dir>/<task_id>`
    pub output_dir: PathBuf,

    /// Directory bare filenames in requests are resolved against
    pub upload_dir: PathBuf,

    /// Terminal tasks older than this are removed by the sweeper
    pub retention_days: u64,

    /// Idle time before a subscriber receives a heartbeat (seconds)
    pub heartbeat_secs: u64,

    /// Snapshots buffered per subscriber before it is dropped
    pub subscriber_buffer: usize,

    /// How often the retention sweeper runs (minutes, 0 disables it)
    pub cleanup_interval_minutes: u64,

    /// Largest accepted file list
    pub max_files_per_task: usize,
}

impl ServiceConfig {
    /// Heartbeat interval as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Retention window as a Duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * SECS_PER_DAY)
    }

    /// Sweeper interval, `None` when disabled
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_minutes > 0)
            .then(|| Duration::from_secs(self.cleanup_interval_minutes * 60))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.max_workers == 0 {
            return Err(TaskError::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_secs == 0 {
            return Err(TaskError::Config(
                "heartbeat_secs must be greater than 0".to_string(),
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(TaskError::Config(
                "subscriber_buffer must be greater than 0".to_string(),
            ));
        }
        if self.max_files_per_task == 0 {
            return Err(TaskError::Config(
                "max_files_per_task must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Testing preset: one worker, no sweeper, artifacts under the system temp dir
    pub fn testing() -> Self {
        Self {
            max_workers: 1,
            output_dir: std::env::temp_dir().join("kgx-test-output"),
            upload_dir: std::env::temp_dir().join("kgx-test-uploads"),
            heartbeat_secs: 1,
            subscriber_buffer: 16,
            cleanup_interval_minutes: 0,
            ..Self::default()
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, TaskError> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| TaskError::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            output_dir: PathBuf::from("output"),
            upload_dir: PathBuf::from("uploads"),
            retention_days: 7,
            heartbeat_secs: 30,
            subscriber_buffer: 64,
            cleanup_interval_minutes: 60,
            max_files_per_task: 50,
        }
    }
}
