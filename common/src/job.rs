use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the worker method a task descriptor is delivered to.
pub const DO_TASK_METHOD: &str = "Worker.DoTask";

/// The two phases of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    #[serde(rename = "mapPhase")]
    Map,
    #[serde(rename = "reducePhase")]
    Reduce,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPhase::Map => write!(f, "map"),
            TaskPhase::Reduce => write!(f, "reduce"),
        }
    }
}

/// Everything a worker needs to run one task.
///
/// `num_other_phase` is the number of partitions a map task must produce,
/// or the number of map outputs a reduce task must read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DoTaskArgs {
    pub job_name: String,
    pub phase: TaskPhase,
    pub task_number: usize,

    /// Input split for map tasks. Empty when the task has none.
    pub file: String,

    pub num_other_phase: usize,
}

/// Intermediate file written by map task `map_task` for reduce task `reduce_task`.
pub fn reduce_name(job_name: &str, map_task: usize, reduce_task: usize) -> String {
    format!("mrtmp.{job_name}-{map_task}-{reduce_task}")
}

/// Output file of reduce task `reduce_task`.
pub fn merge_name(job_name: &str, reduce_task: usize) -> String {
    format!("mrtmp.{job_name}-res-{reduce_task}")
}

/// Final, merged output of a job.
pub fn ans_name(job_name: &str) -> String {
    format!("mrtmp.{job_name}")
}
