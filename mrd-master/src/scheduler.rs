//! Hands every task of a phase to some worker and waits until each one has
//! succeeded at least once.
//!
//! Each task number runs as its own tokio task that loops
//! borrow worker -> call -> return worker, and retries on failure as the
//! [`RetryPolicy`] allows. Task progress lives in a table indexed by task
//! number:
//!
//! ```text
//! Pending -> Dispatched -> Done
//!               |
//!               +--(failure)--> Pending
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{DoTaskArgs, Invoker, TaskPhase};

use crate::retry::{RetryPolicy, Unbounded};
use crate::worker_registry::WorkerRegistry;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("{phase} task {task} failed {attempts} times, giving up")]
    RetriesExhausted {
        phase: TaskPhase,
        task: usize,
        attempts: u32,
    },

    #[error("{phase} phase cancelled with {completed}/{ntasks} tasks done")]
    Cancelled {
        phase: TaskPhase,
        completed: usize,
        ntasks: usize,
    },

    #[error("no workers left to run {phase} task {task}")]
    NoWorkers { phase: TaskPhase, task: usize },

    #[error("{phase} task {task} stopped unexpectedly: {reason}")]
    Aborted {
        phase: TaskPhase,
        task: usize,
        reason: String,
    },
}

/// The tasks making up one phase of a job.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub job_name: String,
    pub phase: TaskPhase,
    pub ntasks: usize,

    /// Input split of each map task, by task number.
    pub inputs: Vec<String>,

    /// Partitions each map task writes, or map outputs each reduce task reads.
    pub num_other_phase: usize,
}

impl PhasePlan {
    /// Plan a phase of the job over `map_files` with `n_reduce` reducers.
    pub fn new(job_name: &str, phase: TaskPhase, map_files: &[String], n_reduce: usize) -> Self {
        let (ntasks, num_other_phase) = match phase {
            TaskPhase::Map => (map_files.len(), n_reduce),
            TaskPhase::Reduce => (n_reduce, map_files.len()),
        };

        Self {
            job_name: job_name.to_string(),
            phase,
            ntasks,
            inputs: map_files.to_vec(),
            num_other_phase,
        }
    }

    /// Descriptor for one task.
    pub fn task_args(&self, task_number: usize) -> DoTaskArgs {
        let file = match self.phase {
            TaskPhase::Map => self.inputs.get(task_number).cloned().unwrap_or_default(),
            TaskPhase::Reduce => String::new(),
        };

        DoTaskArgs {
            job_name: self.job_name.clone(),
            phase: self.phase,
            task_number,
            file,
            num_other_phase: self.num_other_phase,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Treat an attempt as failed if the call has not returned by then.
    pub attempt_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Outcome of a completed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: TaskPhase,
    pub ntasks: usize,

    /// Calls issued, successful or not.
    pub attempts: u32,

    pub failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Dispatched,
    Done,
}

/// Progress of every task in a phase.
#[derive(Debug)]
struct TaskTable {
    states: Vec<TaskState>,
    attempts: Vec<u32>,
    failures: u32,
    completed: usize,
}

impl TaskTable {
    fn new(ntasks: usize) -> Self {
        Self {
            states: vec![TaskState::Pending; ntasks],
            attempts: vec![0; ntasks],
            failures: 0,
            completed: 0,
        }
    }

    /// Record that an attempt for `task` is going out. Returns its attempt number.
    fn dispatch(&mut self, task: usize) -> u32 {
        if self.states[task] == TaskState::Pending {
            self.states[task] = TaskState::Dispatched;
        }
        self.attempts[task] += 1;
        self.attempts[task]
    }

    /// Record the outcome of an attempt.
    ///
    /// Returns `true` only for the first success of `task`; a late success
    /// for a task that is already done changes nothing.
    fn finish(&mut self, task: usize, success: bool) -> bool {
        match (self.states[task], success) {
            (TaskState::Done, _) => false,
            (_, true) => {
                self.states[task] = TaskState::Done;
                self.completed += 1;
                true
            }
            (_, false) => {
                self.states[task] = TaskState::Pending;
                self.failures += 1;
                false
            }
        }
    }

    fn report(&self, phase: TaskPhase) -> PhaseReport {
        PhaseReport {
            phase,
            ntasks: self.states.len(),
            attempts: self.attempts.iter().sum(),
            failures: self.failures,
        }
    }
}

/// Assigns the tasks of a phase to workers from a [`WorkerRegistry`].
#[derive(Debug)]
pub struct Scheduler<I> {
    invoker: Arc<I>,
    registry: Arc<WorkerRegistry>,
    policy: Arc<dyn RetryPolicy>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl<I: Invoker> Scheduler<I> {
    /// Retries forever without backoff until told otherwise.
    pub fn new(invoker: I, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            invoker: Arc::new(invoker),
            registry,
            policy: Arc::new(Unbounded),
            config: SchedulerConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort any running phase when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Run every task of `plan` and return once each has succeeded.
    ///
    /// With the default [`Unbounded`] policy this only returns on success
    /// (or cancellation). Attempts still in flight when the phase fails are
    /// aborted and their workers returned.
    pub async fn schedule(&self, plan: PhasePlan) -> Result<PhaseReport, ScheduleError> {
        let phase = plan.phase;
        let ntasks = plan.ntasks;
        info!(
            "Schedule: {} {} tasks ({} I/Os)",
            ntasks, phase, plan.num_other_phase
        );

        let plan = Arc::new(plan);
        let table = Arc::new(Mutex::new(TaskTable::new(ntasks)));

        let mut tasks = JoinSet::new();
        for task in 0..ntasks {
            let attempt_loop = AttemptLoop {
                invoker: Arc::clone(&self.invoker),
                registry: Arc::clone(&self.registry),
                policy: Arc::clone(&self.policy),
                plan: Arc::clone(&plan),
                table: Arc::clone(&table),
                attempt_timeout: self.config.attempt_timeout,
            };
            tasks.spawn(attempt_loop.run(task));
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tasks.abort_all();
                    let completed = lock(&table).completed;
                    warn!("Schedule: {} cancelled ({}/{} done)", phase, completed, ntasks);
                    return Err(ScheduleError::Cancelled { phase, completed, ntasks });
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    error!("Schedule: {} failed: {}", phase, e);
                    tasks.abort_all();
                    return Err(e);
                }
                Some(Err(e)) => {
                    error!("Schedule: {} attempt loop died: {}", phase, e);
                    tasks.abort_all();
                    return Err(ScheduleError::Aborted {
                        phase,
                        task: first_unfinished(&lock(&table)),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let table = lock(&table);
        debug_assert_eq!(table.completed, ntasks);
        let report = table.report(phase);
        info!(
            "Schedule: {} done ({} attempts, {} failed)",
            phase, report.attempts, report.failures
        );

        Ok(report)
    }
}

fn lock(table: &Mutex<TaskTable>) -> MutexGuard<'_, TaskTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn first_unfinished(table: &TaskTable) -> usize {
    table
        .states
        .iter()
        .position(|state| *state != TaskState::Done)
        .unwrap_or(0)
}

/// Everything one task number needs to drive itself to completion.
struct AttemptLoop<I> {
    invoker: Arc<I>,
    registry: Arc<WorkerRegistry>,
    policy: Arc<dyn RetryPolicy>,
    plan: Arc<PhasePlan>,
    table: Arc<Mutex<TaskTable>>,
    attempt_timeout: Option<Duration>,
}

impl<I: Invoker> AttemptLoop<I> {
    async fn run(self, task: usize) -> Result<(), ScheduleError> {
        let phase = self.plan.phase;
        let mut failures = 0u32;

        loop {
            let Some(lease) = self.registry.acquire().await else {
                return Err(ScheduleError::NoWorkers { phase, task });
            };

            let args = self.plan.task_args(task);
            let attempt = lock(&self.table).dispatch(task);
            debug!(
                "Dispatching {} task {} to {} (attempt {})",
                phase,
                task,
                lease.address(),
                attempt
            );

            let call = self.invoker.invoke(lease.address(), args);
            let ok = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(ok) => ok,
                    Err(_) => {
                        warn!(
                            "{} task {} on {} timed out after {:?}",
                            phase,
                            task,
                            lease.address(),
                            limit
                        );
                        false
                    }
                },
                None => call.await,
            };

            let worker = lease.address().to_string();
            drop(lease);

            if ok {
                if lock(&self.table).finish(task, true) {
                    info!("{} task {} completed", phase, task);
                }
                return Ok(());
            }

            lock(&self.table).finish(task, false);
            failures += 1;
            warn!(
                "{} task {} failed on {} (attempt {}), re-queueing",
                phase, task, worker, attempt
            );

            match self.policy.next_delay(task, failures) {
                Some(delay) if delay.is_zero() => {}
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(ScheduleError::RetriesExhausted {
                        phase,
                        task,
                        attempts: failures,
                    })
                }
            }
        }
    }
}
