use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info};

use common::{Invoker, TaskPhase};

use crate::merge::{cleanup_intermediate, merge_outputs};
use crate::scheduler::{PhasePlan, PhaseReport, Scheduler};

/// State of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Job not started.
    Pending,

    /// Mapping phase.
    Mapping,

    /// Reducing phase.
    Reducing,

    /// Combining reduce outputs.
    Merging,

    /// Job completed.
    Completed,

    /// A phase gave up.
    Failed,
}

/// A job context.
#[derive(Debug, Clone)]
pub struct Job {
    /// Name of the job, used to derive every file it produces.
    name: String,

    /// Input splits, one per map task.
    input_files: Vec<String>,

    /// Number of reduce tasks.
    n_reduce: usize,

    state: JobState,
}

impl Job {
    pub fn new(name: impl Into<String>, input_files: Vec<String>, n_reduce: usize) -> Self {
        Self {
            name: name.into(),
            input_files,
            n_reduce,
            state: JobState::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_reduce(&self) -> usize {
        self.n_reduce
    }

    /// Get the state of the job.
    pub fn state(&self) -> JobState {
        self.state
    }

    fn plan(&self, phase: TaskPhase) -> PhasePlan {
        PhasePlan::new(&self.name, phase, &self.input_files, self.n_reduce)
    }
}

/// What a finished job produced.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_name: String,
    pub output: PathBuf,
    pub map: PhaseReport,
    pub reduce: PhaseReport,
    pub elapsed_ms: u128,
}

/// Runs jobs phase by phase on the workers of a [`Scheduler`].
#[derive(Debug)]
pub struct Master<I> {
    scheduler: Scheduler<I>,

    /// Directory holding intermediate and output files.
    work_dir: PathBuf,

    /// Keep partitions and reduce outputs once the job is merged.
    keep_intermediate: bool,
}

impl<I: Invoker> Master<I> {
    pub fn new(scheduler: Scheduler<I>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            scheduler,
            work_dir: work_dir.into(),
            keep_intermediate: true,
        }
    }

    pub fn keep_intermediate(mut self, keep: bool) -> Self {
        self.keep_intermediate = keep;
        self
    }

    /// Run `job` to completion: map, reduce, then merge.
    pub async fn run(&self, job: &mut Job) -> Result<JobReport> {
        let started = Instant::now();
        info!(
            "Starting job {} ({} inputs, {} reducers)",
            job.name,
            job.input_files.len(),
            job.n_reduce
        );

        let result = self.run_phases(job).await;
        if let Err(e) = &result {
            job.state = JobState::Failed;
            error!("Job {} failed: {:#}", job.name, e);
        }
        let (map, reduce, output) = result?;

        job.state = JobState::Completed;
        let report = JobReport {
            job_name: job.name.clone(),
            output,
            map,
            reduce,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!("Job {} completed in {} ms", job.name, report.elapsed_ms);

        Ok(report)
    }

    async fn run_phases(&self, job: &mut Job) -> Result<(PhaseReport, PhaseReport, PathBuf)> {
        job.state = JobState::Mapping;
        let map = self
            .scheduler
            .schedule(job.plan(TaskPhase::Map))
            .await
            .context("map phase failed")?;

        job.state = JobState::Reducing;
        let reduce = self
            .scheduler
            .schedule(job.plan(TaskPhase::Reduce))
            .await
            .context("reduce phase failed")?;

        job.state = JobState::Merging;
        let work_dir = self.work_dir.clone();
        let name = job.name.clone();
        let (n_map, n_reduce) = (job.input_files.len(), job.n_reduce);
        let keep = self.keep_intermediate;
        let output = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let output = merge_outputs(&work_dir, &name, n_reduce)?;
            if !keep {
                cleanup_intermediate(&work_dir, &name, n_map, n_reduce)?;
            }
            Ok(output)
        })
        .await
        .context("merge task panicked")??;

        Ok((map, reduce, output))
    }
}
