//! The orchestration context
//!
//! [`ExtractionService`] ties the registry, worker pool, progress notifier
//! and retention sweeper together. It is constructed explicitly, started
//! once inside a Tokio runtime and shut down explicitly.

use crate::config::ServiceConfig;
use crate::error::TaskError;
use crate::notifier::{ProgressNotifier, Subscription};
use crate::pool::WorkerPool;
use crate::registry::TaskRegistry;
use crate::request::{ResolvedFile, TaskRequest};
use crate::sweeper::RetentionSweeper;
use crate::types::{ServiceStatus, Task, TaskFile, TaskPage, TaskStatus};
use kgx_domain::TaskId;
use kgx_extractor::{ExtractorConfig, FilePipeline};
use kgx_llm::{ModelConfig, ProviderFactory};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Task orchestration service
pub struct ExtractionService<F: ProviderFactory> {
    config: ServiceConfig,
    extractor: ExtractorConfig,
    factory: Arc<F>,
    registry: Arc<TaskRegistry>,
    notifier: Arc<ProgressNotifier>,
    pool: WorkerPool,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl<F: ProviderFactory> ExtractionService<F> {
    /// Build a service; nothing runs until [`start`](Self::start)
    pub fn new(
        config: ServiceConfig,
        extractor: ExtractorConfig,
        factory: F,
    ) -> Result<Self, TaskError> {
        config.validate()?;
        extractor
            .validate()
            .map_err(|e| TaskError::Config(e.to_string()))?;

        let registry = Arc::new(TaskRegistry::new(config.output_dir.clone()));
        let notifier = Arc::new(ProgressNotifier::new(
            Arc::clone(&registry),
            config.subscriber_buffer,
            config.heartbeat_interval(),
        ));

        Ok(Self {
            pool: WorkerPool::new(config.max_workers),
            config,
            extractor,
            factory: Arc::new(factory),
            registry,
            notifier,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        })
    }

    /// Spawn the progress forwarder and, when enabled, the retention sweeper
    ///
    /// Calling it again has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut background = self.lock_background();
        background.push(
            self.notifier
                .spawn_forwarder(self.registry.subscribe_events(), self.shutdown.clone()),
        );

        if let Some(interval) = self.config.cleanup_interval() {
            let sweeper =
                RetentionSweeper::new(Arc::clone(&self.registry), self.config.retention(), interval);
            let shutdown = self.shutdown.clone();
            background.push(tokio::spawn(async move { sweeper.run(shutdown).await }));
        }

        info!(
            "Extraction service started ({} workers, output at {})",
            self.config.max_workers,
            self.config.output_dir.display()
        );
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background.lock().unwrap_or_else(|poisoned| {
            error!("Background handle mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Service configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Task registry
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Validate a request, register the task and queue its job
    pub fn create_task(&self, request: TaskRequest) -> Result<TaskId, TaskError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(TaskError::ShuttingDown);
        }

        let files = request.validate(&self.config, self.factory.as_ref())?;
        let (task_id, cancel) = self.registry.create(files.len());

        let job = Job {
            task_id,
            files,
            prompt: request.prompt,
            model: request.model,
            cancel: cancel.clone(),
            registry: Arc::clone(&self.registry),
            factory: Arc::clone(&self.factory),
            extractor: self.extractor.clone(),
        };

        self.pool
            .submit(task_id.to_string(), cancel, move || job.run_guarded());
        Ok(task_id)
    }

    /// Current state of a task
    pub fn task(&self, task_id: TaskId) -> Result<Task, TaskError> {
        self.registry
            .get(task_id)
            .ok_or(TaskError::NotFound(task_id))
    }

    /// Page through tasks, newest first
    pub fn list_tasks(&self, status: Option<TaskStatus>, limit: usize, offset: usize) -> TaskPage {
        self.registry.list(status, limit, offset)
    }

    /// Request cancellation; `false` when the task is absent or terminal
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        self.registry.cancel(task_id)
    }

    /// Remove terminal tasks older than `older_than`, with their artifacts
    pub async fn cleanup(&self, older_than: Duration) -> Result<usize, TaskError> {
        self.registry.cleanup(older_than).await
    }

    /// Follow a task's progress
    pub fn subscribe(&self, task_id: TaskId) -> Subscription {
        self.notifier.subscribe(task_id)
    }

    /// Service-wide counters
    pub fn status(&self) -> ServiceStatus {
        let counts = self.registry.counts();
        let service_status = if self.stopping.load(Ordering::SeqCst) {
            "stopping"
        } else {
            "running"
        };

        ServiceStatus {
            service_status: service_status.to_string(),
            total_tasks: counts.total(),
            pending_tasks: counts.pending,
            processing_tasks: counts.processing,
            completed_tasks: counts.completed,
            failed_tasks: counts.failed,
            cancelled_tasks: counts.cancelled,
            max_workers: self.pool.max_workers(),
            active_workers: self.pool.active_workers(),
        }
    }

    /// Cancel everything, stop background work and wait for running jobs
    ///
    /// Running jobs stop at their next file boundary.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down extraction service");

        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} unfinished tasks", cancelled);
        }
        self.pool.close();
        self.shutdown.cancel();
        self.notifier.close_all();

        self.pool.join_all().await;

        let background: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_background());
        for handle in background {
            if let Err(e) = handle.await {
                warn!("Background task join error: {}", e);
            }
        }

        info!("Extraction service stopped");
    }
}

/// One task's work, executed inside a pool slot
struct Job<F: ProviderFactory> {
    task_id: TaskId,
    files: Vec<ResolvedFile>,
    prompt: String,
    model: ModelConfig,
    cancel: CancellationToken,
    registry: Arc<TaskRegistry>,
    factory: Arc<F>,
    extractor: ExtractorConfig,
}

impl<F: ProviderFactory> Job<F> {
    /// Run the job, turning a panic into a system error on the task
    async fn run_guarded(self) {
        let task_id = self.task_id;
        let registry = Arc::clone(&self.registry);
        let started = Instant::now();

        if let Err(e) = tokio::spawn(self.run(started)).await {
            let message = if e.is_panic() {
                format!("Job panicked: {}", panic_message(e.into_panic()))
            } else {
                format!("Job aborted: {}", e)
            };
            registry.fail_system(task_id, message, started.elapsed());
        }
    }

    async fn run(self, started: Instant) {
        let task_id = self.task_id;
        if !self.registry.mark_processing(task_id) {
            debug!("Task {} is no longer pending, skipping", task_id);
            return;
        }

        let provider = match self.factory.build(&self.model) {
            Ok(provider) => provider,
            Err(e) => {
                self.registry.fail_system(
                    task_id,
                    format!("Failed to initialise provider: {}", e),
                    started.elapsed(),
                );
                return;
            }
        };

        let pipeline = match FilePipeline::new(provider, &self.extractor) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.registry
                    .fail_system(task_id, e.to_string(), started.elapsed());
                return;
            }
        };

        let out_dir = self.registry.task_dir(task_id);
        if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
            self.registry.fail_system(
                task_id,
                format!("Failed to create {}: {}", out_dir.display(), e),
                started.elapsed(),
            );
            return;
        }

        let total = self.files.len();
        for (position, file) in self.files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(
                    "Task {} cancelled before file {}/{}",
                    task_id,
                    position + 1,
                    total
                );
                break;
            }

            info!(
                "Task {}: file {}/{} '{}'",
                task_id,
                position + 1,
                total,
                file.file_name
            );

            let outcome = match pipeline
                .extract_file(&file.path, &self.prompt, &out_dir)
                .await
            {
                Ok(extraction) => TaskFile::success(
                    file.file_name.clone(),
                    file.material_id.clone(),
                    extraction.record_count(),
                    extraction.artifacts.to_map(),
                ),
                Err(e) => {
                    warn!("Task {}: '{}' failed: {}", task_id, file.file_name, e);
                    TaskFile::failed(file.file_name.clone(), file.material_id.clone(), e.to_string())
                }
            };
            self.registry
                .record_file(task_id, outcome, started.elapsed());
        }

        if self.cancel.is_cancelled() {
            self.registry.mark_cancelled(task_id, started.elapsed());
        } else {
            self.registry.complete(task_id, started.elapsed());
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgx_llm::{MockProvider, ProviderKind, StaticProviderFactory};

    fn service(
        dir: &std::path::Path,
        provider: MockProvider,
    ) -> ExtractionService<StaticProviderFactory<MockProvider>> {
        let config = ServiceConfig {
            output_dir: dir.join("output"),
            upload_dir: dir.to_path_buf(),
            ..ServiceConfig::testing()
        };
        ExtractionService::new(
            config,
            ExtractorConfig::default(),
            StaticProviderFactory::new(provider),
        )
        .unwrap()
    }

    fn request(names: &[&str]) -> TaskRequest {
        TaskRequest::new(
            names.iter().map(|n| crate::FileSpec::new(*n)).collect(),
            "Extract triples",
            ModelConfig::for_provider(ProviderKind::DeepSeek),
        )
    }

    async fn wait_terminal<G: ProviderFactory>(service: &ExtractionService<G>, id: TaskId) -> Task {
        for _ in 0..200 {
            let task = service.task(id).unwrap();
            if task.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} did not finish", id);
    }

    #[tokio::test]
    async fn test_validation_error_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), MockProvider::default());

        let result = service.create_task(request(&["a.pdf"]));
        assert!(matches!(result, Err(TaskError::Validation(_))));
        assert_eq!(service.status().total_tasks, 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("here.txt"), "Some text.").unwrap();
        let service = service(dir.path(), MockProvider::new("no records"));
        service.start();

        let id = service.create_task(request(&["here.txt", "gone.txt"])).unwrap();
        let task = wait_terminal(&service, id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.processed_files, 1);
        assert_eq!(task.failed_files, 1);
        assert_eq!(task.total_triples, 0);
        assert_eq!(task.errors[0].file_name, "gone.txt");
        assert!(task.results[0].output_files.contains_key("jsonl"));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_provider_build_failure_is_system_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "text").unwrap();

        let config = ServiceConfig {
            output_dir: dir.path().join("output"),
            upload_dir: dir.path().to_path_buf(),
            ..ServiceConfig::testing()
        };
        let factory = kgx_llm::ChatProviderFactory::default();
        let service = ExtractionService::new(config, ExtractorConfig::default(), factory).unwrap();

        if std::env::var(ProviderKind::Forward.api_key_env()).is_ok() {
            return;
        }
        // Blank key and no environment fallback
        let mut req = request(&["a.txt"]);
        req.model = ModelConfig::for_provider(ProviderKind::Forward).with_api_key("   ");

        let id = service.create_task(req).unwrap();
        let task = wait_terminal(&service, id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.errors.len(), 1);
        assert_eq!(task.errors[0].file_name, crate::types::SYSTEM_ERROR_FILE);
        assert!(task.errors[0].error.contains("FORWARD_API_KEY"));
        assert!(task.results.is_empty());
    }

    #[tokio::test]
    async fn test_status_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "text").unwrap();
        let service = service(dir.path(), MockProvider::new("none"));

        let id = service.create_task(request(&["a.txt"])).unwrap();
        wait_terminal(&service, id).await;

        let status = service.status();
        assert_eq!(status.service_status, "running");
        assert_eq!(status.total_tasks, 1);
        assert_eq!(status.completed_tasks, 1);
        assert_eq!(status.max_workers, 1);
        assert!(status.active_workers <= 1);
    }

    #[tokio::test]
    async fn test_no_tasks_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), MockProvider::default());
        service.start();
        service.shutdown().await;

        assert_eq!(service.status().service_status, "stopping");
        assert!(matches!(
            service.create_task(request(&["a.txt"])),
            Err(TaskError::ShuttingDown)
        ));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7_u8)), "unknown panic");
    }
}
