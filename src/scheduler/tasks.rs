//! Periodic task scheduling.
//!
//! # Responsibilities
//! - Run window resets and eviction sweeps at a fixed period
//! - Hand out cancel handles
//! - Stop every task on shutdown
//!
//! # Design Decisions
//! - First fire happens one full period after scheduling
//! - Tasks are plain synchronous closures; they must keep their critical
//!   section short because callers contend on the same state
//! - A task may stop itself by returning [`TaskControl::Stop`]
//! - Missed ticks are delayed, not bursted

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::Shutdown;

/// Smallest period a task may run at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Largest period a task may run at (about 30 years). Longer periods, such
/// as a TTL of `u64::MAX` seconds, are clamped so the first deadline stays
/// representable.
pub const MAX_INTERVAL: Duration = Duration::from_secs(86_400 * 365 * 30);

fn period(every: Duration) -> Duration {
    every.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// What a task wants after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// Keep firing.
    Continue,
    /// Never fire again.
    Stop,
}

/// Body of a periodic task.
pub type ScheduledTask = Arc<dyn Fn() -> TaskControl + Send + Sync>;

/// Anything that can run periodic tasks.
pub trait Schedule: Send + Sync {
    /// Run `task` every `every`, starting one period from now.
    fn schedule(&self, name: &str, every: Duration, task: ScheduledTask) -> TaskHandle;
}

/// Error type for scheduler construction.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler must be started from within a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Debug, Default)]
struct TaskState {
    cancelled: AtomicBool,
    abort: OnceLock<AbortHandle>,
}

/// Cancel handle for a scheduled task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    /// Handle for a task that will never run.
    pub fn inert() -> Self {
        let handle = Self::default();
        handle.state.cancelled.store(true, Ordering::Release);
        handle
    }

    /// Stop future runs. A run already in progress completes.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        if let Some(abort) = self.state.abort.get() {
            abort.abort();
        }
    }

    /// Whether the task has been cancelled or stopped itself.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

/// Tokio-backed periodic task scheduler.
///
/// Construct one per process with [`Scheduler::start`], share it through
/// `Arc`, and call [`Scheduler::shutdown`] at exit.
#[derive(Debug)]
pub struct Scheduler {
    runtime: Handle,
    shutdown: Shutdown,
    tasks: DashMap<u64, TaskHandle>,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Start a scheduler on the current tokio runtime.
    pub fn start() -> Result<Arc<Self>, SchedulerError> {
        let runtime = Handle::try_current()?;
        tracing::debug!("Scheduler started");
        Ok(Arc::new(Self {
            runtime,
            shutdown: Shutdown::new(),
            tasks: DashMap::new(),
            next_id: AtomicU64::new(0),
        }))
    }

    /// Stop every task. Later `schedule` calls return inert handles.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        for task in self.tasks.iter() {
            task.value().cancel();
        }
        self.tasks.clear();
        tracing::info!("Scheduler shut down");
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Number of tasks still scheduled.
    pub fn active_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| !t.value().is_cancelled()).count()
    }
}

impl Schedule for Scheduler {
    fn schedule(&self, name: &str, every: Duration, task: ScheduledTask) -> TaskHandle {
        if self.shutdown.is_triggered() {
            tracing::warn!(task = %name, "Scheduler is shut down, task not scheduled");
            return TaskHandle::inert();
        }

        self.tasks.retain(|_, handle| !handle.is_cancelled());

        let every = period(every);
        let handle = TaskHandle::default();
        let state = handle.state.clone();
        let mut shutdown = self.shutdown.subscribe();
        let task_name = name.to_string();

        let join = self.runtime.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if state.cancelled.load(Ordering::Acquire) {
                            break;
                        }
                        if task() == TaskControl::Stop {
                            tracing::debug!(task = %task_name, "Task stopped itself");
                            break;
                        }
                    }
                    _ = shutdown.recv() => {
                        break;
                    }
                }
            }
            state.cancelled.store(true, Ordering::Release);
        });
        let _ = handle.state.abort.set(join.abort_handle());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.tasks.insert(id, handle.clone());
        tracing::debug!(task = %name, every_ms = every.as_millis() as u64, "Task scheduled");
        handle
    }
}

struct ManualTask {
    name: String,
    every: Duration,
    task: ScheduledTask,
    handle: TaskHandle,
}

/// Scheduler that only runs tasks when told to.
///
/// Intended for tests that need to control exactly when a window resets or a
/// sweep runs.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<ManualTask>>,
}

impl ManualScheduler {
    /// Create an empty manual scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every live task once. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let due: Vec<(ScheduledTask, TaskHandle)> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.retain(|t| !t.handle.is_cancelled());
            tasks.iter().map(|t| (t.task.clone(), t.handle.clone())).collect()
        };

        for (task, handle) in &due {
            if task() == TaskControl::Stop {
                handle.cancel();
            }
        }
        due.len()
    }

    /// Names and periods of live tasks.
    pub fn scheduled(&self) -> Vec<(String, Duration)> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .map(|t| (t.name.clone(), t.every))
            .collect()
    }
}

impl Schedule for ManualScheduler {
    fn schedule(&self, name: &str, every: Duration, task: ScheduledTask) -> TaskHandle {
        let handle = TaskHandle::default();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(ManualTask {
            name: name.to_string(),
            every: period(every),
            task,
            handle: handle.clone(),
        });
        handle
    }
}
