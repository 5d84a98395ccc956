//! Interval-driven background task runner.
//!
//! Tasks register with a name and an interval; a tick loop claims due tasks
//! and spawns each run. A task whose previous run is still executing when
//! its occurrence comes due is skipped and rescheduled, never queued, so at
//! most one run of a given task exists at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::types::{Error, MaintenanceConfig, Result};

pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Result of a task's most recent run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub success: bool,
    /// The task's report on success, its error message on failure.
    pub detail: Value,
    pub finished_at: DateTime<Utc>,
}

/// Point-in-time view of one registered task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub interval_seconds: u64,
    pub running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<TaskOutcome>,
    pub runs: u64,
    pub overlap_skips: u64,
}

struct TaskState {
    running: AtomicBool,
    next_due_at: Mutex<DateTime<Utc>>,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
    last_result: Mutex<Option<TaskOutcome>>,
    runs: AtomicU64,
    overlap_skips: AtomicU64,
}

impl TaskState {
    fn try_claim(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Clears the running flag when a run finishes or is dropped mid-flight.
struct RunGuard {
    state: Arc<TaskState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

struct MaintenanceTask {
    name: String,
    interval: Duration,
    task_fn: TaskFn,
    state: Arc<TaskState>,
}

pub struct MaintenanceScheduler {
    tick_interval: Duration,
    shutdown_grace: Duration,
    tasks: Arc<Mutex<Vec<MaintenanceTask>>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(config: &MaintenanceConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            shutdown_grace: config.shutdown_grace,
            tasks: Arc::new(Mutex::new(Vec::new())),
            stop_tx: Mutex::new(None),
        }
    }

    /// Register a task. The first occurrence comes due one full interval
    /// after registration; `last_run_at` is stamped with the registration
    /// time until the first run starts.
    pub fn register<F>(&self, name: &str, interval: Duration, task_fn: F) -> Result<()>
    where
        F: Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        let mut tasks = lock_mutex(&self.tasks);
        if tasks.iter().any(|task| task.name == name) {
            return Err(Error::config(format!(
                "duplicate maintenance task '{name}'"
            )));
        }
        let now = Utc::now();
        tasks.push(MaintenanceTask {
            name: name.to_string(),
            interval,
            task_fn: Arc::new(task_fn),
            state: Arc::new(TaskState {
                running: AtomicBool::new(false),
                next_due_at: Mutex::new(advance(now, interval)),
                last_run_at: Mutex::new(Some(now)),
                last_result: Mutex::new(None),
                runs: AtomicU64::new(0),
                overlap_skips: AtomicU64::new(0),
            }),
        });
        debug!(
            task = %name,
            interval_seconds = interval.as_secs(),
            "maintenance_task_registered"
        );
        Ok(())
    }

    /// Spawn the tick loop. Tasks registered afterwards are picked up on
    /// the next tick.
    pub fn start(&self) -> JoinHandle<()> {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *lock_mutex(&self.stop_tx) = Some(stop_tx);

        let tasks = self.tasks.clone();
        let tick = self.tick_interval;
        let grace = self.shutdown_grace;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            let mut runs: JoinSet<()> = JoinSet::new();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        spawn_due_tasks(&tasks, &mut runs);
                    }
                    Some(_) = runs.join_next(), if !runs.is_empty() => {}
                    _ = &mut stop_rx => {
                        break;
                    }
                }
            }
            drain(&mut runs, grace).await;
            tracing::info!("maintenance_scheduler_stopped");
        })
    }

    /// Signal the tick loop to exit. In-flight runs get `shutdown_grace`
    /// to finish before they are aborted.
    pub fn stop(&self) {
        if let Some(stop_tx) = lock_mutex(&self.stop_tx).take() {
            let _ = stop_tx.send(());
        }
    }

    /// Execute a task immediately, off-schedule. The run counts like a
    /// scheduled one and pushes the next occurrence a full interval out.
    pub async fn run_now(&self, name: &str) -> Result<Value> {
        let (task_fn, state, interval) = {
            let tasks = lock_mutex(&self.tasks);
            let task = tasks
                .iter()
                .find(|task| task.name == name)
                .ok_or_else(|| Error::task(format!("unknown maintenance task '{name}'")))?;
            (task.task_fn.clone(), task.state.clone(), task.interval)
        };
        if !state.try_claim() {
            return Err(Error::task(format!(
                "maintenance task '{name}' is already running"
            )));
        }
        *lock_mutex(&state.next_due_at) = advance(Utc::now(), interval);
        execute(name, task_fn, state).await
    }

    /// All registered tasks, ordered by name.
    pub fn status(&self) -> Vec<TaskStatus> {
        let tasks = lock_mutex(&self.tasks);
        let mut statuses: Vec<TaskStatus> = tasks
            .iter()
            .map(|task| TaskStatus {
                name: task.name.clone(),
                interval_seconds: task.interval.as_secs(),
                running: task.state.running.load(Ordering::SeqCst),
                last_run_at: *lock_mutex(&task.state.last_run_at),
                last_result: lock_mutex(&task.state.last_result).clone(),
                runs: task.state.runs.load(Ordering::Relaxed),
                overlap_skips: task.state.overlap_skips.load(Ordering::Relaxed),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

impl fmt::Debug for MaintenanceScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceScheduler")
            .field("tick_interval", &self.tick_interval)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

fn spawn_due_tasks(tasks: &Mutex<Vec<MaintenanceTask>>, runs: &mut JoinSet<()>) {
    let now = Utc::now();
    let mut due = Vec::new();
    {
        let tasks = lock_mutex(tasks);
        for task in tasks.iter() {
            {
                let mut next_due = lock_mutex(&task.state.next_due_at);
                if now < *next_due {
                    continue;
                }
                // Reschedule up front: a skipped occurrence is dropped,
                // not deferred until the running instance finishes.
                *next_due = advance(now, task.interval);
            }
            if task.state.try_claim() {
                due.push((task.name.clone(), task.task_fn.clone(), task.state.clone()));
            } else {
                task.state.overlap_skips.fetch_add(1, Ordering::Relaxed);
                warn!(task = %task.name, "maintenance_task_overlap_skipped");
            }
        }
    }
    for (name, task_fn, state) in due {
        runs.spawn(async move {
            let _ = execute(&name, task_fn, state).await;
        });
    }
}

/// Run one claimed task. The caller must hold the running claim; the guard
/// releases it even if the run is aborted.
async fn execute(name: &str, task_fn: TaskFn, state: Arc<TaskState>) -> Result<Value> {
    let _guard = RunGuard {
        state: state.clone(),
    };
    *lock_mutex(&state.last_run_at) = Some(Utc::now());
    let started = std::time::Instant::now();
    let result = task_fn().await;

    let outcome = match &result {
        Ok(detail) => {
            info!(
                task = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "maintenance_task_completed"
            );
            TaskOutcome {
                success: true,
                detail: detail.clone(),
                finished_at: Utc::now(),
            }
        }
        Err(err) => {
            warn!(task = %name, error = %err, "maintenance_task_failed");
            TaskOutcome {
                success: false,
                detail: Value::String(err.to_string()),
                finished_at: Utc::now(),
            }
        }
    };
    *lock_mutex(&state.last_result) = Some(outcome);
    state.runs.fetch_add(1, Ordering::Relaxed);
    result
}

async fn drain(runs: &mut JoinSet<()>, grace: Duration) {
    if runs.is_empty() {
        return;
    }
    let drained = tokio::time::timeout(grace, async {
        while runs.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(outstanding = runs.len(), "maintenance_runs_aborted_at_shutdown");
        runs.abort_all();
    }
}

fn advance(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|span| now.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn lock_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
