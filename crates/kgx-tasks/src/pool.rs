//! Bounded worker pool
//!
//! Every submitted job is spawned at once but waits on a semaphore permit
//! before running, so at most `max_workers` jobs execute together and the
//! rest queue in submission order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Fixed-size pool of job slots
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    active: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Decrements the active counter when a job ends, panics included
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            active: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Pool size
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Jobs currently holding a slot
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Queue a job
    ///
    /// If `cancel` fires or the pool closes before a slot frees up, the job
    /// is dropped without running.
    pub fn submit<F, Fut>(&self, label: String, cancel: CancellationToken, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let active = Arc::clone(&self.active);

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Job {} cancelled while queued", label);
                    return;
                }
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("Pool closed, job {} not started", label);
                        return;
                    }
                },
            };

            let _active = ActiveGuard::enter(&active);
            debug!("Job {} acquired a worker slot", label);
            job().await;
            drop(permit);
        });

        let mut handles = self.lock_handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| {
            error!("Worker handle mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Stop handing out slots; queued jobs are dropped
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Wait for every spawned job to finish
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_handles());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker join error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(format!("job-{}", i), CancellationToken::new(), move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.join_all().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_while_queued_never_runs() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        let blocker = CancellationToken::new();
        let release = blocker.clone();
        pool.submit("blocker".to_string(), CancellationToken::new(), move || async move {
            release.cancelled().await;
        });

        let queued = CancellationToken::new();
        let counter = Arc::clone(&ran);
        pool.submit("queued".to_string(), queued.clone(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.active_workers(), 1);
        queued.cancel();
        blocker.cancel();

        pool.join_all().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_drops_queued_jobs() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let gate = CancellationToken::new();

        let wait = gate.clone();
        pool.submit("first".to_string(), CancellationToken::new(), move || async move {
            wait.cancelled().await;
        });
        let counter = Arc::clone(&ran);
        pool.submit("second".to_string(), CancellationToken::new(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close();
        gate.cancel();
        pool.join_all().await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
