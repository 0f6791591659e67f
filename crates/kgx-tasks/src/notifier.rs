//! Live progress fan-out
//!
//! A forwarder task consumes the registry's snapshot broadcast and pushes
//! each snapshot to the bounded channel of every subscriber of that task.
//! Subscribers that cannot keep up are dropped. Idle subscriptions produce
//! heartbeats on their own timer, independent of the forwarder.

use crate::registry::TaskRegistry;
use crate::types::Task;
use chrono::Utc;
use kgx_domain::TaskId;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One item of a progress stream
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Full task state after a change
    Snapshot(Task),
    /// Nothing changed within the heartbeat interval
    Heartbeat {
        /// When the heartbeat was produced
        timestamp: chrono::DateTime<Utc>,
    },
    /// The task does not exist
    NotFound,
}

impl ProgressEvent {
    /// JSON payload for the wire
    pub fn to_json(&self) -> Value {
        match self {
            ProgressEvent::Snapshot(task) => {
                serde_json::to_value(task).unwrap_or_else(|e| json!({ "error": e.to_string() }))
            }
            ProgressEvent::Heartbeat { timestamp } => json!({
                "type": "heartbeat",
                "timestamp": timestamp.to_rfc3339(),
            }),
            ProgressEvent::NotFound => json!({ "error": "Task not found" }),
        }
    }

    /// Whether no event follows this one
    pub fn is_final(&self) -> bool {
        match self {
            ProgressEvent::Snapshot(task) => task.is_terminal(),
            ProgressEvent::Heartbeat { .. } => false,
            ProgressEvent::NotFound => true,
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<Task>,
    last_revision: u64,
}

/// Per-task subscriber sets fed from the registry
pub struct ProgressNotifier {
    registry: Arc<TaskRegistry>,
    subscribers: Mutex<HashMap<TaskId, Vec<Subscriber>>>,
    buffer: usize,
    heartbeat: Duration,
}

impl ProgressNotifier {
    /// Create a notifier over `registry`
    pub fn new(registry: Arc<TaskRegistry>, buffer: usize, heartbeat: Duration) -> Self {
        Self {
            registry,
            subscribers: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            heartbeat,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Vec<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            error!("Subscriber map mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Subscribe to a task
    ///
    /// The current snapshot is the first event. Unknown tasks yield a single
    /// [`ProgressEvent::NotFound`].
    pub fn subscribe(&self, task_id: TaskId) -> Subscription {
        // The subscriber lock is held across the registry read so that no
        // snapshot published in between is lost.
        let mut subscribers = self.lock();
        let Some(snapshot) = self.registry.get(task_id) else {
            debug!("Subscription to unknown task {}", task_id);
            return Subscription::not_found(task_id, Arc::clone(&self.registry), self.heartbeat);
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let last_revision = snapshot.revision;
        let terminal = snapshot.is_terminal();
        // Fresh channel with capacity >= 1
        let _ = tx.try_send(snapshot);

        if !terminal {
            subscribers
                .entry(task_id)
                .or_default()
                .push(Subscriber { tx, last_revision });
        }
        debug!("New subscriber for task {}", task_id);

        Subscription::live(task_id, rx, Arc::clone(&self.registry), self.heartbeat)
    }

    /// Deliver a snapshot to the task's subscribers
    ///
    /// Snapshots not newer than what a subscriber already has are skipped.
    /// A terminal snapshot closes every subscription of the task.
    pub fn publish(&self, task: &Task) {
        let mut subscribers = self.lock();
        Self::deliver(&mut subscribers, task);
    }

    fn deliver(subscribers: &mut HashMap<TaskId, Vec<Subscriber>>, task: &Task) {
        let Some(list) = subscribers.get_mut(&task.task_id) else {
            return;
        };

        list.retain_mut(|sub| {
            if task.revision <= sub.last_revision {
                return true;
            }
            match sub.tx.try_send(task.clone()) {
                Ok(()) => {
                    sub.last_revision = task.revision;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Dropping slow subscriber of task {}", task.task_id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        if task.is_terminal() || list.is_empty() {
            subscribers.remove(&task.task_id);
        }
    }

    /// Re-read every subscribed task from the registry
    ///
    /// Used after the forwarder lagged behind the broadcast.
    pub fn resync(&self) {
        let mut subscribers = self.lock();
        let task_ids: Vec<TaskId> = subscribers.keys().copied().collect();
        for task_id in task_ids {
            match self.registry.get(task_id) {
                Some(task) => Self::deliver(&mut subscribers, &task),
                None => {
                    subscribers.remove(&task_id);
                }
            }
        }
    }

    /// Number of live subscribers of a task
    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.lock().get(&task_id).map_or(0, Vec::len)
    }

    /// Drop every subscription
    pub fn close_all(&self) {
        let mut subscribers = self.lock();
        let count: usize = subscribers.values().map(Vec::len).sum();
        subscribers.clear();
        if count > 0 {
            info!("Closed {} progress subscriptions", count);
        }
    }

    /// Forward registry snapshots to subscribers until `shutdown` fires
    pub fn spawn_forwarder(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<Task>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            debug!("Progress forwarder started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(task) => notifier.publish(&task),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Progress forwarder lagged by {} snapshots, resyncing", skipped);
                            notifier.resync();
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Progress forwarder stopped");
        })
    }
}

enum SubscriptionState {
    NotFound,
    Live(mpsc::Receiver<Task>),
    Done,
}

/// A stream of [`ProgressEvent`]s for one task
pub struct Subscription {
    task_id: TaskId,
    state: SubscriptionState,
    registry: Arc<TaskRegistry>,
    heartbeat: Duration,
}

impl Subscription {
    fn live(
        task_id: TaskId,
        rx: mpsc::Receiver<Task>,
        registry: Arc<TaskRegistry>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            task_id,
            state: SubscriptionState::Live(rx),
            registry,
            heartbeat,
        }
    }

    fn not_found(task_id: TaskId, registry: Arc<TaskRegistry>, heartbeat: Duration) -> Self {
        Self {
            task_id,
            state: SubscriptionState::NotFound,
            registry,
            heartbeat,
        }
    }

    /// Task this subscription follows
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next event, or `None` once the stream is over
    ///
    /// The stream ends after a terminal snapshot, after a heartbeat that
    /// finds the task gone, or when the notifier drops the subscriber.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        let rx = match &mut self.state {
            SubscriptionState::Done => return None,
            SubscriptionState::NotFound => {
                self.state = SubscriptionState::Done;
                return Some(ProgressEvent::NotFound);
            }
            SubscriptionState::Live(rx) => rx,
        };

        match timeout(self.heartbeat, rx.recv()).await {
            Ok(Some(task)) => {
                if task.is_terminal() {
                    self.state = SubscriptionState::Done;
                }
                Some(ProgressEvent::Snapshot(task))
            }
            Ok(None) => {
                self.state = SubscriptionState::Done;
                None
            }
            Err(_) => {
                if !self.registry.contains(self.task_id) {
                    debug!("Task {} vanished, ending subscription", self.task_id);
                    self.state = SubscriptionState::Done;
                }
                Some(ProgressEvent::Heartbeat {
                    timestamp: Utc::now(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskFile, TaskStatus};
    use std::collections::BTreeMap;

    fn setup(buffer: usize, heartbeat: Duration) -> (tempfile::TempDir, Arc<TaskRegistry>, Arc<ProgressNotifier>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TaskRegistry::new(dir.path()));
        let notifier = Arc::new(ProgressNotifier::new(Arc::clone(&registry), buffer, heartbeat));
        (dir, registry, notifier)
    }

    fn snapshot(event: Option<ProgressEvent>) -> Task {
        match event {
            Some(ProgressEvent::Snapshot(task)) => task,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_task_yields_single_not_found() {
        let (_dir, _registry, notifier) = setup(4, Duration::from_secs(5));
        let mut sub = notifier.subscribe(TaskId::new());

        let event = sub.next().await.unwrap();
        assert_eq!(event, ProgressEvent::NotFound);
        assert_eq!(event.to_json()["error"], "Task not found");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshots_then_close_on_terminal() {
        let (_dir, registry, notifier) = setup(8, Duration::from_secs(5));
        let (id, _) = registry.create(1);

        let mut sub = notifier.subscribe(id);
        assert_eq!(snapshot(sub.next().await).status, TaskStatus::Pending);

        let mut events = registry.subscribe_events();
        registry.mark_processing(id);
        registry.record_file(
            id,
            TaskFile::success("a.txt", None, 2, BTreeMap::new()),
            Duration::ZERO,
        );
        registry.complete(id, Duration::ZERO);
        while let Ok(task) = events.try_recv() {
            notifier.publish(&task);
        }

        assert_eq!(snapshot(sub.next().await).status, TaskStatus::Processing);
        assert_eq!(snapshot(sub.next().await).processed_files, 1);
        assert_eq!(snapshot(sub.next().await).status, TaskStatus::Completed);
        assert!(sub.next().await.is_none());
        assert_eq!(notifier.subscriber_count(id), 0);
    }

    #[tokio::test]
    async fn test_stale_snapshots_are_skipped() {
        let (_dir, registry, notifier) = setup(8, Duration::from_millis(50));
        let (id, _) = registry.create(1);
        let stale = registry.get(id).unwrap();

        let mut sub = notifier.subscribe(id);
        snapshot(sub.next().await);

        notifier.publish(&stale);
        assert!(matches!(sub.next().await, Some(ProgressEvent::Heartbeat { .. })));
    }

    #[tokio::test]
    async fn test_heartbeat_when_idle_and_end_when_gone() {
        let (_dir, registry, notifier) = setup(8, Duration::from_millis(50));
        let (id, _) = registry.create(1);
        let mut sub = notifier.subscribe(id);
        snapshot(sub.next().await);

        let event = sub.next().await.unwrap();
        assert!(matches!(event, ProgressEvent::Heartbeat { .. }));
        assert_eq!(event.to_json()["type"], "heartbeat");

        registry.cancel(id);
        registry
            .cleanup_before(Utc::now() + chrono::Duration::seconds(1))
            .await;
        notifier.close_all();

        // Subscriber dropped by close_all
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_detects_vanished_task() {
        let (_dir, registry, notifier) = setup(8, Duration::from_millis(50));
        let (id, _) = registry.create(1);
        let mut sub = notifier.subscribe(id);
        snapshot(sub.next().await);

        registry.cancel(id);
        registry
            .cleanup_before(Utc::now() + chrono::Duration::seconds(1))
            .await;

        // The cancel snapshot was never forwarded; the liveness check notices
        assert!(matches!(sub.next().await, Some(ProgressEvent::Heartbeat { .. })));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_dropped() {
        let (_dir, registry, notifier) = setup(1, Duration::from_secs(5));
        let (id, _) = registry.create(3);
        let _sub = notifier.subscribe(id);
        assert_eq!(notifier.subscriber_count(id), 1);

        registry.mark_processing(id);
        notifier.publish(&registry.get(id).unwrap());

        assert_eq!(notifier.subscriber_count(id), 0);
    }

    #[tokio::test]
    async fn test_terminal_task_subscription_ends_after_snapshot() {
        let (_dir, registry, notifier) = setup(4, Duration::from_secs(5));
        let (id, _) = registry.create(1);
        registry.cancel(id);

        let mut sub = notifier.subscribe(id);
        assert_eq!(snapshot(sub.next().await).status, TaskStatus::Cancelled);
        assert!(sub.next().await.is_none());
        assert_eq!(notifier.subscriber_count(id), 0);
    }

    #[tokio::test]
    async fn test_forwarder_delivers_and_stops() {
        let (_dir, registry, notifier) = setup(8, Duration::from_secs(5));
        let shutdown = CancellationToken::new();
        let handle = notifier.spawn_forwarder(registry.subscribe_events(), shutdown.clone());

        let (id, _) = registry.create(1);
        let mut sub = notifier.subscribe(id);
        snapshot(sub.next().await);

        registry.cancel(id);
        assert_eq!(snapshot(sub.next().await).status, TaskStatus::Cancelled);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
