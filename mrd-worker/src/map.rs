use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Error};
use tracing::{debug, info};

use common::codec::{write_records, OutputDiscipline};
use common::{partition_for, reduce_name, KeyValue, MapFn};

/// Run one map task.
///
/// Reads `input_file`, applies `map_fn` and writes the emitted pairs to one
/// partition file per reduce task under `work_dir`. Partitions that receive
/// no pairs are not written.
pub fn do_map(
    work_dir: &Path,
    job_name: &str,
    map_task: usize,
    input_file: &Path,
    n_reduce: usize,
    map_fn: MapFn,
    discipline: OutputDiscipline,
) -> Result<(), Error> {
    if n_reduce == 0 {
        return Err(anyhow!("map task {map_task} has no partitions to write"));
    }

    info!(
        "Starting map task {} of job {} on {}",
        map_task,
        job_name,
        input_file.display()
    );

    let contents = fs::read_to_string(input_file)
        .with_context(|| format!("failed to read input {}", input_file.display()))?;
    let filename = input_file.to_string_lossy();
    let kvs = map_fn(&filename, &contents)
        .with_context(|| format!("map function failed on {}", input_file.display()))?;

    let mut partitions: Vec<Vec<KeyValue>> = vec![Vec::new(); n_reduce];
    for kv in kvs {
        partitions[partition_for(kv.key(), n_reduce)].push(kv);
    }

    for (reduce_task, records) in partitions.iter().enumerate() {
        if records.is_empty() {
            continue;
        }
        let path = work_dir.join(reduce_name(job_name, map_task, reduce_task));
        debug!("Writing {} records to {}", records.len(), path.display());
        write_records(&path, records, discipline)?;
    }

    Ok(())
}
