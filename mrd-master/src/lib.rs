//! The master side of a job: worker registry, task scheduler and the driver
//! that runs a job's phases in order.

pub mod jobs;
pub mod merge;
pub mod retry;
pub mod scheduler;
pub mod worker_registry;

pub use jobs::{Job, JobReport, JobState, Master};
pub use retry::{ExponentialBackoff, RetryPolicy, Unbounded};
pub use scheduler::{PhasePlan, PhaseReport, ScheduleError, Scheduler, SchedulerConfig};
pub use worker_registry::{WorkerLease, WorkerRegistry};
