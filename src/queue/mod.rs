// Task queue for EchoNote Core
// Bounded-concurrency worker pool with cooperative cancellation,
// pause/resume admission gating, and retry-with-backoff

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::constants::MAX_CONCURRENT_TASKS_LIMIT;
use crate::error::{CoreError, CoreResult};

const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub type JobFuture = Pin<Box<dyn Future<Output = CoreResult<()>> + Send>>;
/// A queued unit of work. Invoked once per attempt with the task's
/// cooperative cancellation token.
pub type TaskJob = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Queue-side view of a task's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTaskState {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueTaskState::Completed | QueueTaskState::Failed | QueueTaskState::Cancelled
        )
    }
}

struct TaskEntry {
    state: QueueTaskState,
    token: CancellationToken,
}

struct QueuedJob {
    task_id: String,
    job: TaskJob,
    attempt: u32,
}

struct QueueInner {
    semaphore: RwLock<Arc<Semaphore>>,
    max_concurrent: AtomicUsize,
    max_retries: u32,
    retry_delay: Duration,
    tasks: DashMap<String, TaskEntry>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    buffered: Mutex<Vec<QueuedJob>>,
    paused_tx: watch::Sender<bool>,
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    in_flight: AtomicU32,
    drained: Notify,
}

/// Bounded-concurrency async task queue.
///
/// Tasks added before `start()` are buffered in memory and flushed when the
/// queue comes up. Admission order is FIFO; cancellation is observed at the
/// job's own suspension points, not preemptively.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(max_concurrent: usize, max_retries: u32, retry_delay: Duration) -> Self {
        let max_concurrent = max_concurrent.clamp(1, MAX_CONCURRENT_TASKS_LIMIT);
        let (paused_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(QueueInner {
                semaphore: RwLock::new(Arc::new(Semaphore::new(max_concurrent))),
                max_concurrent: AtomicUsize::new(max_concurrent),
                max_retries,
                retry_delay,
                tasks: DashMap::new(),
                sender: Mutex::new(None),
                buffered: Mutex::new(Vec::new()),
                paused_tx,
                running: AtomicBool::new(false),
                shutdown: Mutex::new(CancellationToken::new()),
                in_flight: AtomicU32::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Enqueue a task. Returns the task's cancellation token. Duplicate ids
    /// of non-terminal tasks are rejected.
    pub fn add(&self, task_id: &str, job: TaskJob) -> CoreResult<CancellationToken> {
        if let Some(entry) = self.inner.tasks.get(task_id) {
            if !entry.state.is_terminal() {
                return Err(CoreError::validation(format!(
                    "task {task_id} is already queued"
                )));
            }
        }

        let token = CancellationToken::new();
        self.inner.tasks.insert(
            task_id.to_string(),
            TaskEntry {
                state: QueueTaskState::Queued,
                token: token.clone(),
            },
        );

        let queued = QueuedJob {
            task_id: task_id.to_string(),
            job,
            attempt: 0,
        };

        let live_sender = {
            let guard = self.inner.sender.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(sender) if self.inner.running.load(Ordering::SeqCst) => Some(sender.clone()),
                _ => None,
            }
        };

        match live_sender {
            Some(sender) => {
                if sender.send(queued).is_err() {
                    return Err(CoreError::fatal("task queue channel closed"));
                }
            }
            None => {
                log::debug!("Queue not running, buffering task {}", task_id);
                self.inner
                    .buffered
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(queued);
            }
        }

        Ok(token)
    }

    /// Start the dispatcher on the current Tokio runtime and flush buffered
    /// tasks. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::warn!("Task queue is already running");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();

        // Flush tasks buffered before startup, preserving submission order.
        {
            let mut buffered = self
                .inner
                .buffered
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for job in buffered.drain(..) {
                let _ = tx.send(job);
            }
        }

        *self.inner.sender.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        *self.inner.shutdown.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();

        let inner = self.inner.clone();
        tokio::spawn(dispatcher_loop(inner, rx));

        log::info!(
            "Task queue started (max concurrent: {})",
            self.inner.max_concurrent.load(Ordering::SeqCst)
        );
    }

    /// Stop the queue: cancel every in-flight token, await workers for a
    /// bounded interval, then give up on stragglers. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Close admission first so no new work is dispatched.
        *self.inner.sender.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.inner
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();

        for mut entry in self.inner.tasks.iter_mut() {
            if !entry.state.is_terminal() {
                entry.token.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + STOP_DRAIN_TIMEOUT;
        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::timeout_at(deadline, self.inner.drained.notified())
                .await
                .is_err()
            {
                log::warn!(
                    "Task queue stop timed out with {} worker(s) still running",
                    self.inner.in_flight.load(Ordering::SeqCst)
                );
                break;
            }
        }

        log::info!("Task queue stopped");
    }

    /// Gate admission of new work; in-flight tasks continue.
    pub fn pause(&self) {
        let _ = self.inner.paused_tx.send(true);
        log::info!("Task queue paused");
    }

    pub fn resume(&self) {
        let _ = self.inner.paused_tx.send(false);
        log::info!("Task queue resumed");
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Signal the task's cooperative token. Returns whether a live task was
    /// reachable.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.inner.tasks.get(task_id) {
            Some(entry) if !entry.state.is_terminal() => {
                entry.token.cancel();
                log::info!("Cancellation requested for task {}", task_id);
                true
            }
            _ => false,
        }
    }

    /// Atomically replace the admission semaphore. Running tasks keep their
    /// permits from the old semaphore.
    pub fn update_max_concurrent(&self, max_concurrent: usize) -> CoreResult<()> {
        if !(1..=MAX_CONCURRENT_TASKS_LIMIT).contains(&max_concurrent) {
            return Err(CoreError::validation(format!(
                "max_concurrent must be between 1 and {MAX_CONCURRENT_TASKS_LIMIT}"
            )));
        }

        let previous = self.inner.max_concurrent.swap(max_concurrent, Ordering::SeqCst);
        if previous != max_concurrent {
            *self
                .inner
                .semaphore
                .write()
                .unwrap_or_else(|e| e.into_inner()) = Arc::new(Semaphore::new(max_concurrent));
            log::info!(
                "Task queue concurrency updated: {} -> {}",
                previous,
                max_concurrent
            );
        }
        Ok(())
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn task_state(&self, task_id: &str) -> Option<QueueTaskState> {
        self.inner.tasks.get(task_id).map(|entry| entry.state)
    }

    pub fn processing_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|entry| entry.state == QueueTaskState::Processing)
            .count()
    }

    /// Forget a task's bookkeeping entry (used when deleting tasks).
    pub fn remove_entry(&self, task_id: &str) {
        self.inner.tasks.remove(task_id);
    }
}

async fn dispatcher_loop(inner: Arc<QueueInner>, mut rx: mpsc::UnboundedReceiver<QueuedJob>) {
    let shutdown = inner
        .shutdown
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    let mut paused_rx = inner.paused_tx.subscribe();

    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Admission gate: wait out pause, then acquire a permit from the
        // current semaphore generation.
        if paused_rx.wait_for(|paused| !*paused).await.is_err() {
            break;
        }

        let semaphore = inner
            .semaphore
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => continue,
            },
        };

        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let worker_inner = inner.clone();
        tokio::spawn(async move {
            run_job(worker_inner, job).await;
            drop(permit);
        });
    }

    log::debug!("Task queue dispatcher exited");
}

async fn run_job(inner: Arc<QueueInner>, queued: QueuedJob) {
    let QueuedJob {
        task_id,
        job,
        attempt,
    } = queued;

    let token = match inner.tasks.get(&task_id) {
        Some(entry) => entry.token.clone(),
        None => {
            finish_worker(&inner);
            return;
        }
    };

    set_state(&inner, &task_id, QueueTaskState::Processing);

    let result = if token.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        job(token.clone()).await
    };

    match result {
        Ok(()) => set_state(&inner, &task_id, QueueTaskState::Completed),
        Err(CoreError::Cancelled) => {
            log::info!("Task {} cancelled", task_id);
            set_state(&inner, &task_id, QueueTaskState::Cancelled);
        }
        Err(err) if err.is_retryable() && attempt < inner.max_retries => {
            let delay = match &err {
                CoreError::Transient {
                    retry_after: Some(delay),
                    ..
                } => *delay,
                _ => inner.retry_delay,
            };
            log::warn!(
                "Task {} failed transiently (attempt {}/{}), retrying in {:?}: {}",
                task_id,
                attempt + 1,
                inner.max_retries,
                delay,
                err
            );
            set_state(&inner, &task_id, QueueTaskState::Queued);

            let retry_inner = inner.clone();
            let retry_id = task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let sender = {
                    let guard = retry_inner
                        .sender
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    guard.clone()
                };
                if let Some(sender) = sender {
                    let _ = sender.send(QueuedJob {
                        task_id: retry_id,
                        job,
                        attempt: attempt + 1,
                    });
                }
            });
        }
        Err(err) => {
            log::error!("Task {} failed: {}", task_id, err);
            set_state(&inner, &task_id, QueueTaskState::Failed);
        }
    }

    finish_worker(&inner);
}

fn set_state(inner: &QueueInner, task_id: &str, state: QueueTaskState) {
    if let Some(mut entry) = inner.tasks.get_mut(task_id) {
        entry.state = state;
    }
}

fn finish_worker(inner: &QueueInner) {
    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    inner.drained.notify_waiters();
}
