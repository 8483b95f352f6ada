use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Run a MapReduce job on in-process workers", long_about = None)]
pub struct Args {
    /// Glob matching the input files. Each file is one map task.
    #[arg(short, long)]
    pub input: String,

    /// Name of the workload to run.
    #[arg(short, long, default_value = "wc")]
    pub workload: String,

    /// Job name. Prefixes every file the job writes. Defaults to the workload name.
    #[arg(short, long)]
    pub job: Option<String>,

    /// Number of reduce tasks.
    #[arg(short = 'r', long, default_value = "4")]
    pub n_reduce: usize,

    /// Number of workers to start.
    #[arg(short = 'n', long, default_value = "4")]
    pub workers: usize,

    /// Directory for intermediate and output files.
    #[arg(short = 'd', long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Remove intermediate files once the output is merged.
    #[arg(long)]
    pub clean: bool,

    /// Write outputs over existing files without truncating them first.
    #[arg(long)]
    pub in_place: bool,

    /// Probability that a worker call fails before doing any work.
    #[arg(long, default_value = "0")]
    pub failure_rate: f64,

    /// Probability that a worker call does the work but reports failure.
    #[arg(long, default_value = "0")]
    pub lost_reply_rate: f64,

    /// Give up on a task after this many failed attempts. Retries forever if unset.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Initial delay between attempts of a task, in milliseconds.
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Seconds before a worker call counts as failed. 0 waits forever.
    #[arg(long, default_value = "60")]
    pub attempt_timeout: u64,
}
