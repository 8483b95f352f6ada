use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Error};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, warn};

use common::codec::OutputDiscipline;
use common::job::DO_TASK_METHOD;
use common::{merge_name, DoTaskArgs, Invoker, TaskPhase, Workload};
use mrd_master::WorkerRegistry;

use crate::map::do_map;
use crate::reduce::do_reduce;

/// How a worker behaves, including the faults it should fake.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory partitions and reduce outputs are read from and written to.
    pub work_dir: PathBuf,

    pub discipline: OutputDiscipline,

    /// Probability that a call fails before any work is done.
    pub failure_rate: f64,

    /// Probability that a call does the work but still reports failure.
    pub lost_reply_rate: f64,

    /// Fail every call after serving this many.
    pub crash_after: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            discipline: OutputDiscipline::Replace,
            failure_rate: 0.0,
            lost_reply_rate: 0.0,
            crash_after: None,
        }
    }
}

/// One in-process worker. Runs a single task at a time.
#[derive(Debug)]
pub struct MRWorker {
    name: String,
    workload: Workload,
    config: WorkerConfig,
    busy: AtomicBool,
    served: AtomicUsize,
}

/// Marks a worker idle again once its task stops running.
///
/// Owned by the blocking closure, so a caller that stops waiting does not
/// free the worker while the work is still in progress.
struct InProgress(Arc<MRWorker>);

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

fn roll(rate: f64) -> bool {
    rate > 0.0 && rand::thread_rng().gen_bool(rate.min(1.0))
}

impl MRWorker {
    pub fn new(name: impl Into<String>, workload: Workload, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            workload,
            config,
            busy: AtomicBool::new(false),
            served: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a task is running on this worker.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Number of calls this worker has accepted.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    /// Handle a `DoTask` call.
    pub async fn do_task(self: Arc<Self>, args: DoTaskArgs) -> Result<(), Error> {
        if self.busy.swap(true, Ordering::SeqCst) {
            bail!("worker {} is busy", self.name);
        }
        let in_progress = InProgress(Arc::clone(&self));

        let served = self.served.fetch_add(1, Ordering::SeqCst);
        if self.config.crash_after.is_some_and(|limit| served >= limit) {
            bail!("worker {} has crashed", self.name);
        }
        if roll(self.config.failure_rate) {
            bail!("injected failure on {}", self.name);
        }

        debug!(
            "{} running {} task {} of job {}",
            self.name, args.phase, args.task_number, args.job_name
        );

        tokio::task::spawn_blocking(move || in_progress.0.execute(&args))
            .await
            .context("task panicked")??;

        if roll(self.config.lost_reply_rate) {
            bail!("reply from {} lost", self.name);
        }

        Ok(())
    }

    fn execute(&self, args: &DoTaskArgs) -> Result<(), Error> {
        let work_dir = &self.config.work_dir;
        match args.phase {
            TaskPhase::Map => {
                if args.file.is_empty() {
                    return Err(anyhow!("map task {} has no input file", args.task_number));
                }
                do_map(
                    work_dir,
                    &args.job_name,
                    args.task_number,
                    Path::new(&args.file),
                    args.num_other_phase,
                    self.workload.map_fn,
                    self.config.discipline,
                )
            }
            TaskPhase::Reduce => {
                let output = work_dir.join(merge_name(&args.job_name, args.task_number));
                do_reduce(
                    work_dir,
                    &args.job_name,
                    args.task_number,
                    &output,
                    args.num_other_phase,
                    self.workload.reduce_fn,
                    self.config.discipline,
                )
                .map(|_| ())
            }
        }
    }
}

/// Workers living in this process, reachable by address.
#[derive(Debug, Default)]
pub struct LocalCluster {
    workers: DashMap<String, Arc<MRWorker>>,

    /// Index of the next spawned worker. Never reused, even after a kill.
    next_index: AtomicUsize,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `count` workers and register each with `registry`.
    pub fn spawn_workers(
        &self,
        registry: &WorkerRegistry,
        count: usize,
        workload: Workload,
        config: &WorkerConfig,
    ) -> Result<Vec<String>, Error> {
        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            let address = format!("local-worker-{index}");
            self.add_worker(registry, MRWorker::new(address.clone(), workload, config.clone()))?;
            addresses.push(address);
        }
        Ok(addresses)
    }

    /// Register a worker under its own name.
    ///
    /// Fails if the address is taken, here or in `registry`.
    pub fn add_worker(&self, registry: &WorkerRegistry, worker: MRWorker) -> Result<(), Error> {
        let address = worker.name().to_string();
        if registry.is_registered(&address) {
            bail!("worker {address} is already registered");
        }
        match self.workers.entry(address.clone()) {
            Entry::Occupied(_) => bail!("worker {address} already exists"),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(worker));
            }
        }
        if !registry.register_worker(address.clone()) {
            self.workers.remove(&address);
            bail!("registry refused worker {address}");
        }
        Ok(())
    }

    /// Stop a worker. Calls to its address fail from now on.
    pub fn kill(&self, address: &str) -> bool {
        self.workers.remove(address).is_some()
    }

    pub fn worker(&self, address: &str) -> Option<Arc<MRWorker>> {
        self.workers.get(address).map(|w| Arc::clone(w.value()))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Invoker for LocalCluster {
    async fn invoke(&self, endpoint: &str, args: DoTaskArgs) -> bool {
        let Some(worker) = self.worker(endpoint) else {
            warn!("{} to {} failed: no such worker", DO_TASK_METHOD, endpoint);
            return false;
        };

        let (phase, task) = (args.phase, args.task_number);
        match worker.do_task(args).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "{} {} {} on {} failed: {:#}",
                    DO_TASK_METHOD, phase, task, endpoint, e
                );
                false
            }
        }
    }
}
