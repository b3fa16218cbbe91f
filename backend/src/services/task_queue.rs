//! Durable task queue with a polling worker pool.
//!
//! Tasks live in the manager store. Workers poll on a fixed interval and
//! claim the oldest eligible task with a single conditional update, so at
//! most one worker owns a task at a time. Delivery is at-least-once:
//!
//! - `pending` tasks are claimable;
//! - `processing` tasks whose lock is older than the stale-lock timeout are
//!   claimable again until they have been claimed `max_attempts` times,
//!   after which they are failed and their handler's
//!   [`on_abandoned`](TaskHandler::on_abandoned) hook runs;
//! - handler errors, panics and unknown task types are terminal.
//!
//! A worker renews its lock while the handler runs, so only a crashed
//! worker's task goes stale. Terminal updates only apply while the caller
//! still holds the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::task::Task;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct TaskQueueConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub stale_lock_timeout: Duration,
    pub max_attempts: i32,
}

impl TaskQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.task_queue_concurrency,
            poll_interval: config.poll_interval(),
            stale_lock_timeout: config.stale_lock_timeout(),
            max_attempts: config.task_queue_max_attempts,
        }
    }
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: Duration::from_millis(500),
            stale_lock_timeout: Duration::from_secs(600),
            max_attempts: 3,
        }
    }
}

/// Processes tasks of one type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;

    /// Called once a task is failed without its handler running, after a
    /// worker holding it stopped renewing its lock too many times.
    async fn on_abandoned(&self, _task: &Task, _reason: &str) {}
}

/// Persistence primitives of the queue. Every state change is atomic.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task_type: &str, payload: Vec<u8>) -> Result<Task>;

    /// Fail stale `processing` tasks that exhausted their attempts and
    /// return them.
    async fn fail_exhausted(&self, stale_after: Duration, max_attempts: i32) -> Result<Vec<Task>>;

    /// Claim the oldest eligible task for `worker_id`, incrementing its
    /// attempt count.
    async fn claim_next(
        &self,
        worker_id: &str,
        stale_after: Duration,
        max_attempts: i32,
    ) -> Result<Option<Task>>;

    /// Refresh the lock. Returns false when `worker_id` no longer holds the task.
    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool>;

    /// Returns false when `worker_id` no longer holds the task.
    async fn mark_completed(&self, id: Uuid, worker_id: &str) -> Result<bool>;

    /// Returns false when `worker_id` no longer holds the task.
    async fn mark_failed(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>>;
}

// ── PostgreSQL store ──

const TASK_COLUMNS: &str =
    "id, task_type, payload, status, attempts, error, locked_at, locked_by, created_at, updated_at";

pub struct PgTaskStore {
    db: PgPool,
}

impl PgTaskStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, task_type: &str, payload: Vec<u8>) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "INSERT INTO tasks (task_type, payload) VALUES ($1, $2) RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_type)
        .bind(payload)
        .fetch_one(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(task)
    }

    async fn fail_exhausted(&self, stale_after: Duration, max_attempts: i32) -> Result<Vec<Task>> {
        sqlx::query_as::<_, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                error = 'lock expired after ' || attempts || ' attempts',
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE status = 'processing'
              AND locked_at < NOW() - make_interval(secs => $1)
              AND attempts >= $2
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(stale_after.as_secs_f64())
        .bind(max_attempts)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        stale_after: Duration,
        max_attempts: i32,
    ) -> Result<Option<Task>> {
        let stale_secs = stale_after.as_secs_f64();

        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            UPDATE tasks
            SET status = 'processing',
                locked_at = NOW(),
                locked_by = $1,
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM tasks
                WHERE (status = 'pending'
                       AND (locked_at IS NULL OR locked_at < NOW() - make_interval(secs => $2)))
                   OR (status = 'processing'
                       AND locked_at < NOW() - make_interval(secs => $2)
                       AND attempts < $3)
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(stale_secs)
        .bind(max_attempts)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(task)
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET locked_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(&self, id: Uuid, worker_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', error = NULL, locked_at = NULL, locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error = $3, locked_at = NULL, locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

// ── Queue and worker pool ──

pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    config: TaskQueueConfig,
    pool_id: String,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    started: AtomicBool,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

fn pool_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &nonce[..8])
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, config: TaskQueueConfig) -> Self {
        Self {
            store,
            config,
            pool_id: pool_identity(),
            handlers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Insert a pending task. Never waits for execution.
    pub async fn enqueue(&self, task_type: &str, payload: Vec<u8>) -> Result<Task> {
        let task = self.store.insert(task_type, payload).await?;
        tracing::info!(task_id = %task.id, task_type, "Enqueued task");
        Ok(task)
    }

    /// Associate a handler with a task type. Must be called before [`start`](Self::start).
    pub fn register_handler(&self, task_type: &str, handler: Arc<dyn TaskHandler>) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(AppError::Internal(format!(
                "cannot register handler for '{task_type}' after the task queue started"
            )));
        }
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_type.to_string(), handler);
        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
        self.store.get(id).await
    }

    /// Launch the poller workers.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::Internal("task queue already started".to_string()));
        }

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for n in 0..self.config.concurrency {
            let queue = Arc::clone(self);
            let worker_id = format!("{}#{}", self.pool_id, n);
            workers.push(tokio::spawn(async move { queue.run_worker(worker_id).await }));
        }

        tracing::info!(
            pool = %self.pool_id,
            workers = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Task queue started"
        );
        Ok(())
    }

    /// Signal every worker to exit and wait for their current iteration.
    ///
    /// A handler that is already running is allowed to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Task queue worker exited abnormally: {}", e);
            }
        }
        tracing::info!(pool = %self.pool_id, "Task queue stopped");
    }

    async fn run_worker(&self, worker_id: String) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Drain while work is available.
            while !self.cancel.is_cancelled() {
                match self.process_next(&worker_id).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(worker = %worker_id, "Task claim failed: {}", e);
                        break;
                    }
                }
            }
        }

        tracing::debug!(worker = %worker_id, "Worker exiting");
    }

    fn handler_for(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .cloned()
    }

    /// Lock renewal period: a third of the stale-lock timeout.
    fn heartbeat_period(&self) -> Duration {
        (self.config.stale_lock_timeout / 3).max(Duration::from_millis(10))
    }

    /// Fail exhausted stale tasks and notify their handlers.
    async fn reap_abandoned(&self) -> Result<()> {
        let abandoned = self
            .store
            .fail_exhausted(self.config.stale_lock_timeout, self.config.max_attempts)
            .await?;

        for task in abandoned {
            let reason = task
                .error
                .clone()
                .unwrap_or_else(|| "lock expired".to_string());
            tracing::warn!(
                task_id = %task.id,
                task_type = %task.task_type,
                attempts = task.attempts,
                "Failed task whose attempts were exhausted"
            );
            if let Some(handler) = self.handler_for(&task.task_type) {
                handler.on_abandoned(&task, &reason).await;
            }
        }
        Ok(())
    }

    /// Run the handler while renewing the task's lock.
    async fn run_handler(
        &self,
        handler: Arc<dyn TaskHandler>,
        task: &Task,
        worker_id: &str,
    ) -> std::result::Result<(), String> {
        let claimed = task.clone();
        let mut running = tokio::spawn(async move { handler.handle(&claimed).await });

        let mut heartbeat = interval(self.heartbeat_period());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let joined = loop {
            tokio::select! {
                joined = &mut running => break joined,
                _ = heartbeat.tick() => {
                    match self.store.heartbeat(task.id, worker_id).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(task_id = %task.id, worker = %worker_id, "Task lock lost while running");
                        }
                        Err(e) => {
                            tracing::warn!(task_id = %task.id, worker = %worker_id, "Task heartbeat failed: {}", e);
                        }
                    }
                }
            }
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("handler panicked: {e}")),
        }
    }

    /// Claim and run one task. Returns false when nothing was claimable.
    pub async fn process_next(&self, worker_id: &str) -> Result<bool> {
        self.reap_abandoned().await?;

        let Some(task) = self
            .store
            .claim_next(
                worker_id,
                self.config.stale_lock_timeout,
                self.config.max_attempts,
            )
            .await?
        else {
            return Ok(false);
        };

        tracing::debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            attempt = task.attempts,
            worker = %worker_id,
            "Claimed task"
        );

        let outcome = match self.handler_for(&task.task_type) {
            None => Err(format!(
                "no handler registered for task type '{}'",
                task.task_type
            )),
            Some(handler) => self.run_handler(handler, &task, worker_id).await,
        };

        match outcome {
            Ok(()) => {
                if self.store.mark_completed(task.id, worker_id).await? {
                    tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task completed");
                } else {
                    tracing::warn!(task_id = %task.id, worker = %worker_id, "Task lock lost before completion");
                }
            }
            Err(message) => {
                tracing::error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    error = %message,
                    "Task failed"
                );
                if !self.store.mark_failed(task.id, worker_id, &message).await? {
                    tracing::warn!(task_id = %task.id, worker = %worker_id, "Task lock lost before failure");
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory task store with the same claim semantics as [`PgTaskStore`].

    use super::*;
    use crate::models::task::TaskStatus;
    use chrono::Utc;

    #[derive(Default)]
    pub struct MemoryTaskStore {
        tasks: Mutex<Vec<Task>>,
    }

    impl MemoryTaskStore {
        /// Move a task's lock into the past.
        pub fn backdate_lock(&self, id: Uuid, by: Duration) {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                let by = chrono::Duration::from_std(by).unwrap();
                task.locked_at = task.locked_at.map(|at| at - by);
            }
        }
    }

    #[async_trait]
    impl TaskStore for MemoryTaskStore {
        async fn insert(&self, task_type: &str, payload: Vec<u8>) -> Result<Task> {
            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4(),
                task_type: task_type.to_string(),
                payload,
                status: TaskStatus::Pending,
                attempts: 0,
                error: None,
                locked_at: None,
                locked_by: None,
                created_at: now,
                updated_at: now,
            };
            self.tasks.lock().unwrap().push(task.clone());
            Ok(task)
        }

        async fn fail_exhausted(
            &self,
            stale_after: Duration,
            max_attempts: i32,
        ) -> Result<Vec<Task>> {
            let now = Utc::now();
            let cutoff = now - chrono::Duration::from_std(stale_after).unwrap();

            let mut failed = Vec::new();
            for task in self.tasks.lock().unwrap().iter_mut() {
                if task.status == TaskStatus::Processing
                    && task.locked_at.is_some_and(|at| at < cutoff)
                    && task.attempts >= max_attempts
                {
                    task.status = TaskStatus::Failed;
                    task.error = Some(format!("lock expired after {} attempts", task.attempts));
                    task.locked_at = None;
                    task.locked_by = None;
                    task.updated_at = now;
                    failed.push(task.clone());
                }
            }
            Ok(failed)
        }

        async fn claim_next(
            &self,
            worker_id: &str,
            stale_after: Duration,
            max_attempts: i32,
        ) -> Result<Option<Task>> {
            let now = Utc::now();
            let cutoff = now - chrono::Duration::from_std(stale_after).unwrap();
            let stale = |t: &Task| t.locked_at.is_some_and(|at| at < cutoff);

            let mut tasks = self.tasks.lock().unwrap();
            let eligible = tasks.iter_mut().find(|t| match t.status {
                TaskStatus::Pending => t.locked_at.is_none() || stale(t),
                TaskStatus::Processing => stale(t) && t.attempts < max_attempts,
                _ => false,
            });

            Ok(eligible.map(|task| {
                task.status = TaskStatus::Processing;
                task.locked_at = Some(now);
                task.locked_by = Some(worker_id.to_string());
                task.attempts += 1;
                task.updated_at = now;
                task.clone()
            }))
        }

        async fn heartbeat(&self, id: Uuid, worker_id: &str) -> Result<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            let held = tasks.iter_mut().find(|t| {
                t.id == id
                    && t.status == TaskStatus::Processing
                    && t.locked_by.as_deref() == Some(worker_id)
            });
            Ok(match held {
                Some(task) => {
                    task.locked_at = Some(Utc::now());
                    true
                }
                None => false,
            })
        }

        async fn mark_completed(&self, id: Uuid, worker_id: &str) -> Result<bool> {
            Ok(self.finish(id, worker_id, TaskStatus::Completed, None))
        }

        async fn mark_failed(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool> {
            Ok(self.finish(id, worker_id, TaskStatus::Failed, Some(error.to_string())))
        }

        async fn get(&self, id: Uuid) -> Result<Option<Task>> {
            Ok(self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned())
        }
    }

    impl MemoryTaskStore {
        fn finish(&self, id: Uuid, worker_id: &str, status: TaskStatus, error: Option<String>) -> bool {
            let mut tasks = self.tasks.lock().unwrap();
            match tasks.iter_mut().find(|t| {
                t.id == id
                    && t.status == TaskStatus::Processing
                    && t.locked_by.as_deref() == Some(worker_id)
            }) {
                Some(task) => {
                    task.status = status;
                    task.error = error;
                    task.locked_at = None;
                    task.locked_by = None;
                    task.updated_at = Utc::now();
                    true
                }
                None => false,
            }
        }
    }
}
