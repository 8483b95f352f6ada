//! Runs a whole job in one process: a master and a pool of local workers.

use std::fs;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use tracing::info;

use common::codec::OutputDiscipline;
use mrd_master::{
    ExponentialBackoff, Job, JobReport, Master, Scheduler, SchedulerConfig, WorkerRegistry,
};
use mrd_worker::{LocalCluster, WorkerConfig};

mod args;

pub use args::Args;

/// Expand the input glob into a sorted list of files.
fn input_files(pattern: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in glob::glob(pattern).with_context(|| format!("bad input glob {pattern:?}"))? {
        let path = entry?;
        if path.is_file() {
            files.push(path.to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

fn check_rate(name: &str, rate: f64) -> Result<()> {
    ensure!((0.0..=1.0).contains(&rate), "{name} must be between 0 and 1, got {rate}");
    Ok(())
}

pub async fn run(args: Args) -> Result<JobReport> {
    let Some(workload) = workload::try_named(&args.workload) else {
        bail!(
            "unknown workload {:?}, expected one of {}",
            args.workload,
            workload::NAMES.join(", ")
        );
    };
    ensure!(args.n_reduce > 0, "need at least one reduce task");
    ensure!(args.workers > 0, "need at least one worker");
    check_rate("failure rate", args.failure_rate)?;
    check_rate("lost reply rate", args.lost_reply_rate)?;

    let files = input_files(&args.input)?;
    ensure!(!files.is_empty(), "no input files match {:?}", args.input);

    fs::create_dir_all(&args.work_dir)
        .with_context(|| format!("failed to create {}", args.work_dir.display()))?;

    let registry = WorkerRegistry::new();
    let cluster = LocalCluster::new();
    let worker_config = WorkerConfig {
        work_dir: args.work_dir.clone(),
        discipline: if args.in_place {
            OutputDiscipline::InPlace
        } else {
            OutputDiscipline::Replace
        },
        failure_rate: args.failure_rate,
        lost_reply_rate: args.lost_reply_rate,
        crash_after: None,
    };
    cluster.spawn_workers(&registry, args.workers, workload, &worker_config)?;
    info!("Started {} local workers", cluster.len());

    let scheduler_config = SchedulerConfig {
        attempt_timeout: (args.attempt_timeout > 0)
            .then(|| Duration::from_secs(args.attempt_timeout)),
    };
    let mut scheduler = Scheduler::new(cluster, registry).with_config(scheduler_config);
    if args.max_attempts.is_some() || args.backoff_ms.is_some() {
        let mut policy = ExponentialBackoff::default();
        if let Some(max) = args.max_attempts {
            policy = policy.with_max_attempts(max);
        }
        if let Some(ms) = args.backoff_ms {
            policy = policy.with_initial(Duration::from_millis(ms));
        }
        scheduler = scheduler.with_policy(policy);
    }

    let master = Master::new(scheduler, args.work_dir.clone()).keep_intermediate(!args.clean);
    let job_name = args.job.unwrap_or_else(|| args.workload.clone());
    let mut job = Job::new(job_name, files, args.n_reduce);
    master.run(&mut job).await
}
